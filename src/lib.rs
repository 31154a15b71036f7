//! Offline layer for the Ansury X habit tracker.
//!
//! Intercepted GET requests are served by one of three caching strategies,
//! the worker version moves through an install/activate lifecycle, and writes
//! made offline are queued and replayed when a sync trigger fires.

pub mod cache;
pub mod config;
pub mod db;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod network;
pub mod router;
pub mod sync;
pub mod worker;

pub use config::Config;
pub use worker::{Action, ClientMessage, Completed, Event, ServiceWorker};
