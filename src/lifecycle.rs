//! Install / activate lifecycle of a worker version.
//!
//! A version moves Installing -> Installed -> Active, and later to Superseded
//! once a newer version activates. A failed install ends in Redundant.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, RequestKey};
use crate::config::{Config, GenerationsConfig};
use crate::db::Database;
use crate::http::{Request, Response};
use crate::network::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Installing,
  /// Installed, waiting to take over
  Installed,
  Active,
  Superseded,
  /// Install failed; this version never activates
  Redundant,
}

impl Phase {
  pub fn as_str(&self) -> &'static str {
    match self {
      Phase::Installing => "installing",
      Phase::Installed => "installed",
      Phase::Active => "active",
      Phase::Superseded => "superseded",
      Phase::Redundant => "redundant",
    }
  }

  fn parse(s: &str) -> Result<Self> {
    match s {
      "installing" => Ok(Phase::Installing),
      "installed" => Ok(Phase::Installed),
      "active" => Ok(Phase::Active),
      "superseded" => Ok(Phase::Superseded),
      "redundant" => Ok(Phase::Redundant),
      other => Err(eyre!("Unknown lifecycle phase: {}", other)),
    }
  }
}

impl std::fmt::Display for Phase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Lifecycle state of one worker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
  pub version: String,
  pub phase: Phase,
  /// Skip the wait for open clients to close before activating
  pub skip_waiting: bool,
  /// Open clients are governed by this version without a reload
  pub clients_claimed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub generation: String,
  pub cached: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
  pub deleted: Vec<String>,
}

impl Lifecycle {
  pub fn new(version: impl Into<String>) -> Self {
    Self {
      version: version.into(),
      phase: Phase::Installing,
      skip_waiting: false,
      clients_claimed: false,
    }
  }

  pub fn is_active(&self) -> bool {
    self.phase == Phase::Active
  }

  /// Ask to activate without waiting for open clients to close.
  pub fn request_skip_waiting(&mut self) {
    if matches!(self.phase, Phase::Installing | Phase::Installed) {
      self.skip_waiting = true;
    }
  }

  /// Pre-populate the static generation with the asset manifest.
  ///
  /// All assets are fetched before anything is written, and written in one
  /// transaction: a single unreachable or non-2xx asset fails the install and
  /// leaves the generation untouched. Re-running with the same manifest
  /// overwrites the same keys.
  pub async fn install<S: CacheStore + ?Sized>(
    &mut self,
    store: &S,
    network: &dyn Network,
    config: &Config,
  ) -> Result<InstallReport> {
    let was_active = self.begin_install()?;
    let result = precache(store, network, config).await;
    self.finish_install(was_active, result)
  }

  /// First half of [`Lifecycle::install`]: enter Installing unless this version
  /// already governs. Returns whether it was Active.
  pub fn begin_install(&mut self) -> Result<bool> {
    if self.phase == Phase::Superseded {
      return Err(eyre!("Version {} has been superseded", self.version));
    }
    let was_active = self.is_active();
    if !was_active {
      self.phase = Phase::Installing;
    }
    Ok(was_active)
  }

  /// Second half of [`Lifecycle::install`]: apply the outcome of [`precache`].
  /// An Active version stays Active either way.
  pub fn finish_install(
    &mut self,
    was_active: bool,
    result: Result<InstallReport>,
  ) -> Result<InstallReport> {
    match result {
      Ok(report) => {
        if !was_active {
          self.phase = Phase::Installed;
          self.skip_waiting = true;
        }
        info!("Installed {}: {} assets cached", self.version, report.cached);
        Ok(report)
      }
      Err(e) => {
        if !was_active {
          self.phase = Phase::Redundant;
        }
        warn!("Install of {} failed: {}", self.version, e);
        Err(e)
      }
    }
  }

  /// Delete every generation not recognized by this version, then claim clients.
  pub fn activate<S: CacheStore + ?Sized>(
    &mut self,
    store: &S,
    config: &Config,
  ) -> Result<ActivateReport> {
    match self.phase {
      Phase::Installed if self.skip_waiting => {}
      Phase::Active => {}
      Phase::Installed => {
        return Err(eyre!(
          "Version {} is waiting for open clients to close",
          self.version
        ))
      }
      phase => {
        return Err(eyre!(
          "Cannot activate version {} from phase {}",
          self.version,
          phase
        ))
      }
    }

    let mut deleted = Vec::new();
    for generation in store.generations()? {
      if !config.generations.is_recognized(&generation) {
        info!("Deleting old cache generation: {}", generation);
        store.delete_generation(&generation)?;
        deleted.push(generation);
      }
    }

    self.phase = Phase::Active;
    self.clients_claimed = true;
    Ok(ActivateReport { deleted })
  }
}

/// Fetch the asset manifest and write it to the static generation in one batch.
pub async fn precache<S: CacheStore + ?Sized>(
  store: &S,
  network: &dyn Network,
  config: &Config,
) -> Result<InstallReport> {
  let requests = config
    .static_assets
    .iter()
    .map(|path| config.resolve(path).map(Request::get))
    .collect::<Result<Vec<_>>>()?;

  let responses = join_all(requests.iter().map(|r| network.fetch(r))).await;

  let mut entries: Vec<(RequestKey, Response)> = Vec::with_capacity(requests.len());
  for (request, response) in requests.iter().zip(responses) {
    let response = response.map_err(|e| eyre!("Failed to precache {}: {}", request.url, e))?;
    if !response.ok() {
      return Err(eyre!(
        "Failed to precache {}: status {}",
        request.url,
        response.status
      ));
    }
    debug!("Precached {}", request.url);
    entries.push((RequestKey::for_request(request), response));
  }

  let generation = config.generations.static_assets.clone();
  store.put_all(&generation, &entries)?;

  Ok(InstallReport {
    generation,
    cached: entries.len(),
  })
}

/// Lifecycle rows persisted across runs, one per version.
pub struct SqliteLifecycleStore {
  db: Arc<Database>,
}

impl SqliteLifecycleStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Stored state for a version, or a fresh Installing state.
  pub fn load(&self, version: &str) -> Result<Lifecycle> {
    let conn = self.db.conn()?;
    let row: Option<(String, bool, bool)> = conn
      .query_row(
        "SELECT phase, skip_waiting, clients_claimed FROM worker_versions WHERE version = ?",
        params![version],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to load lifecycle of {}: {}", version, e))?;

    match row {
      Some((phase, skip_waiting, clients_claimed)) => Ok(Lifecycle {
        version: version.to_string(),
        phase: Phase::parse(&phase)?,
        skip_waiting,
        clients_claimed,
      }),
      None => Ok(Lifecycle::new(version)),
    }
  }

  /// Persist a state together with the generations the version owns.
  /// Activating a version supersedes every other active one.
  pub fn save(&self, lifecycle: &Lifecycle, generations: &GenerationsConfig) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO worker_versions
         (version, phase, skip_waiting, clients_claimed,
          shell_generation, static_generation, api_generation, updated_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%d %H:%M:%f', 'now'))",
      params![
        lifecycle.version,
        lifecycle.phase.as_str(),
        lifecycle.skip_waiting,
        lifecycle.clients_claimed,
        generations.shell,
        generations.static_assets,
        generations.api
      ],
    )
    .map_err(|e| eyre!("Failed to save lifecycle of {}: {}", lifecycle.version, e))?;

    if lifecycle.is_active() {
      let superseded = tx
        .execute(
          "UPDATE worker_versions SET phase = 'superseded', clients_claimed = 0,
             updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
           WHERE version != ? AND phase IN ('installing', 'installed', 'active')",
          params![lifecycle.version],
        )
        .map_err(|e| eyre!("Failed to supersede old versions: {}", e))?;
      if superseded > 0 {
        info!("{} older version(s) superseded by {}", superseded, lifecycle.version);
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  /// Generations of the most recently saved Active version other than
  /// `version`. That version keeps serving while `version` is not yet Active.
  pub fn governing(&self, version: &str) -> Result<Option<GenerationsConfig>> {
    let conn = self.db.conn()?;
    conn
      .query_row(
        "SELECT shell_generation, static_generation, api_generation FROM worker_versions
         WHERE phase = 'active' AND version != ? AND api_generation != ''
         ORDER BY updated_at DESC LIMIT 1",
        params![version],
        |row| {
          Ok(GenerationsConfig {
            shell: row.get(0)?,
            static_assets: row.get(1)?,
            api: row.get(2)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to load governing version: {}", e))
  }
}
