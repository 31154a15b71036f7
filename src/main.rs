use ansury_sw::cache::{CacheStore, ResponseSource, SqliteCacheStore};
use ansury_sw::config::Config;
use ansury_sw::db::Database;
use ansury_sw::http::{Destination, Method, Request};
use ansury_sw::lifecycle::SqliteLifecycleStore;
use ansury_sw::network::HttpNetwork;
use ansury_sw::sync::{MutationKind, MutationQueue, SqliteMutationQueue};
use ansury_sw::{Action, Completed, Event, ServiceWorker};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ansury-sw")]
#[command(about = "Offline cache and background sync for Ansury X")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/ansury-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-populate the static cache generation
  Install,
  /// Evict unrecognized cache generations and take over
  Activate,
  /// Serve a request through the worker
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    #[arg(short, long, default_value = "GET")]
    method: Method,
    /// Request destination (document, image, script, ...)
    #[arg(short, long, default_value = "empty")]
    destination: Destination,
  },
  /// Queue a write for background sync
  Enqueue {
    /// habit-completion or journal-entry
    kind: String,
    /// JSON payload
    payload: String,
  },
  /// Deliver a background sync trigger
  Sync { tag: String },
  /// Post a JSON message to the worker, e.g. '{"type":"SKIP_WAITING"}'
  Message { json: String },
  /// List queued mutations
  Pending,
  /// List cache generations and their entries
  Generations,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = ansury_sw::logging::init(&config.logging)?;

  let db = Arc::new(Database::open(config.database.as_deref())?);
  let store = Arc::new(SqliteCacheStore::new(Arc::clone(&db)));
  let queue = Arc::new(SqliteMutationQueue::new(Arc::clone(&db)));
  let lifecycles = SqliteLifecycleStore::new(Arc::clone(&db));
  let network = Arc::new(HttpNetwork::new(
    config.network_timeout_secs.map(Duration::from_secs),
  )?);

  let event = match args.command {
    Command::Install => Event::Install,
    Command::Activate => Event::Activate,
    Command::Fetch {
      url,
      method,
      destination,
    } => {
      let mut request = Request::get(config.resolve(&url)?).with_destination(destination);
      request.method = method;
      Event::Fetch(request)
    }
    Command::Enqueue { kind, payload } => {
      let kind = MutationKind::from_tag(&kind)
        .ok_or_else(|| eyre!("Unknown mutation kind '{}'", kind))?;
      let payload: serde_json::Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Payload is not valid JSON: {}", e))?;
      Event::Message(serde_json::json!({
        "type": "QUEUE_MUTATION",
        "kind": kind,
        "payload": payload,
      }))
    }
    Command::Sync { tag } => Event::Sync(tag),
    Command::Message { json } => Event::Message(
      serde_json::from_str(&json).map_err(|e| eyre!("Message is not valid JSON: {}", e))?,
    ),
    Command::Pending => {
      for kind in MutationKind::ALL {
        for mutation in queue.pending(kind)? {
          println!(
            "{}\t{}\t{}\t{}",
            mutation.queued_at, kind, mutation.id, mutation.payload
          );
        }
      }
      return Ok(());
    }
    Command::Generations => {
      for generation in store.generations()? {
        let recognized = if config.generations.is_recognized(&generation) {
          ""
        } else {
          " (stale)"
        };
        println!("{}{}", generation, recognized);
        for key in store.keys(&generation)? {
          println!("  {}", key);
        }
      }
      return Ok(());
    }
  };

  let version = config.generations.version();
  let lifecycle = lifecycles.load(&version)?;
  let governing = lifecycles.governing(&version)?;
  let worker = ServiceWorker::with_lifecycle(config, store, queue, network, lifecycle)
    .with_governing(governing);

  let result = match event {
    Event::Fetch(request) => worker.fetch(request).await.map(Action::RespondWith),
    event => worker.dispatch(event).await,
  };
  // Failed installs are persisted too
  lifecycles.save(&worker.lifecycle().await, &worker.config().generations)?;

  match result? {
    Action::RespondWith(served) => {
      let source = match served.source {
        ResponseSource::Network => "network",
        ResponseSource::Cache => "cache",
        ResponseSource::Fallback => "offline fallback",
      };
      eprintln!("{} ({})", served.response.status, source);
      std::io::stdout().write_all(&served.response.body)?;
      if let Some(revalidation) = served.revalidation {
        revalidation
          .await
          .map_err(|e| eyre!("Background refresh panicked: {}", e))?;
      }
    }
    Action::Passthrough => eprintln!("Not intercepted"),
    Action::WaitUntil(completed) => match completed {
      Completed::Installed(report) => {
        println!("Cached {} assets in {}", report.cached, report.generation)
      }
      Completed::Activated(report) => {
        if report.deleted.is_empty() {
          println!("Activated; no stale generations");
        } else {
          println!("Activated; deleted {}", report.deleted.join(", "));
        }
      }
      Completed::Synced(report) => println!(
        "{} synced, {} remaining",
        report.synced, report.remaining
      ),
      Completed::Queued(mutation) => println!("Queued {} {}", mutation.kind, mutation.id),
      Completed::SkipWaiting => println!("Skip waiting requested"),
    },
    Action::Ignored => eprintln!("Ignored"),
  }

  Ok(())
}
