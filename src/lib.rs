//! Offline write-behind layer for Food Alert.
//!
//! Three pieces cooperate:
//! - [`cache::AssetCache`] serves static assets cache-first from one live generation
//! - [`outbox::Outbox`] durably queues postings created while offline
//! - [`sync::SyncCoordinator`] replays the outbox once connectivity returns
//!
//! [`worker::ServiceWorker`] wires them to host events and [`host::Host`]
//! delivers those events.

pub mod cache;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod host;
pub mod logging;
pub mod net;
pub mod outbox;
pub mod sync;
pub mod worker;
