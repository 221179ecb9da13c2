//! fleet-state — records and embedded state store for the relay fleet.
//!
//! Backed by [redb](https://docs.rs/redb), persists relay servers,
//! notification channels, per-server health-check configs and access keys.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns and
//! keyed by their numeric id. Health-check configs share the id of the
//! server they belong to.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and implements [`ConfigSource`], the read seam the health monitor uses
//! to discover what to probe.
//!
//! `ServerHealthStatus` lives here as a plain type but is never persisted:
//! the health monitor owns and mutates it in memory.

pub mod error;
pub mod source;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{ConfigError, StateError, StateResult};
pub use source::ConfigSource;
pub use store::StateStore;
pub use types::*;
