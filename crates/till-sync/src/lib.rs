//! # till-sync: Outbox Drain for Till
//!
//! Every committed change to a synced entity leaves one row in the local
//! `sync_queue`. This crate delivers those rows to a remote endpoint, in the
//! background, so a sale never waits on the network.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Outbox Drain Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  OutboxWorker (worker.rs)                        │  │
//! │  │                                                                  │  │
//! │  │  Spawned as a Tokio task (till-syncd or the host app)            │  │
//! │  │  Interval + "sync now" + shutdown, backoff after failures        │  │
//! │  └───────────────┬──────────────────────────────┬───────────────────┘  │
//! │                  │                              │                       │
//! │                  ▼                              ▼                       │
//! │  ┌────────────────────────────┐   ┌────────────────────────────────┐   │
//! │  │  till-db Store             │   │  RemoteSink (remote.rs)        │   │
//! │  │                            │   │                                │   │
//! │  │  sync_queue: deliverable,  │   │  HttpSink: JSON POST with      │   │
//! │  │  mark_synced,              │   │  Idempotency-Key, timeout,     │   │
//! │  │  record_failure            │   │  retryable vs. rejected        │   │
//! │  │  company.record_sync       │   │                                │   │
//! │  └────────────────────────────┘   └────────────────────────────────┘   │
//! │                                                                         │
//! │  SyncConfig (config.rs): defaults → sync.toml → TILL_* env → validate  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Sync configuration (device, remote, sync, storage)
//! - [`error`] - Sync error types
//! - [`remote`] - Remote sink trait and HTTP implementation
//! - [`worker`] - Drain pass and run loop
//!
//! ## Usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use till_sync::{HttpSink, OutboxWorker, SyncConfig};
//!
//! let config = SyncConfig::load(None)?;
//! let sink = Arc::new(HttpSink::from_config(&config)?);
//! let (worker, handle) = OutboxWorker::new(store, sink, config.sync.clone());
//! tokio::spawn(worker.run());
//!
//! // after checkout
//! handle.sync_now();
//! ```

pub mod config;
pub mod error;
pub mod remote;
pub mod worker;

pub use config::{SyncConfig, SyncMode, SyncSettings};
pub use error::{SyncError, SyncResult};
pub use remote::{DeliveryError, HttpSink, OutboundOperation, RemoteSink};
pub use worker::{DrainReport, OutboxWorker, WorkerHandle, WorkerStatus};
