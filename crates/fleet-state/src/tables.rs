//! redb table definitions for the fleet state store.
//!
//! Each table uses `u64` record ids as keys and `&[u8]` values
//! (JSON-serialized records).

use redb::TableDefinition;

/// Relay servers keyed by server id.
pub const SERVERS: TableDefinition<u64, &[u8]> = TableDefinition::new("servers");

/// Notification channels keyed by channel id.
pub const CHANNELS: TableDefinition<u64, &[u8]> = TableDefinition::new("channels");

/// Health-check configs keyed by the id of the server they watch.
pub const HEALTH_CHECKS: TableDefinition<u64, &[u8]> = TableDefinition::new("health_checks");

/// Dynamic access keys keyed by key id.
pub const ACCESS_KEYS: TableDefinition<u64, &[u8]> = TableDefinition::new("access_keys");
