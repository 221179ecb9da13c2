//! StateStore: redb-backed persistence for the relay fleet.
//!
//! Provides typed CRUD over servers, channels, health checks and access
//! keys. All values are JSON-serialized into redb's `&[u8]` value columns.
//! The store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ConfigError, StateError, StateResult};
use crate::source::ConfigSource;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type RowTable = TableDefinition<'static, u64, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SERVERS).map_err(map_err!(Table))?;
        txn.open_table(CHANNELS).map_err(map_err!(Table))?;
        txn.open_table(HEALTH_CHECKS).map_err(map_err!(Table))?;
        txn.open_table(ACCESS_KEYS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic row access ─────────────────────────────────────────

    fn put_row<T: Serialize>(&self, def: RowTable, id: u64, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(id, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_row<T: DeserializeOwned>(&self, def: RowTable, id: u64) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_rows<T: DeserializeOwned>(&self, def: RowTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let row = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(row);
        }
        Ok(results)
    }

    fn delete_row(&self, def: RowTable, id: u64) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Servers ────────────────────────────────────────────────────

    /// Insert or update a server record.
    pub fn put_server(&self, server: &ServerRecord) -> StateResult<()> {
        self.put_row(SERVERS, server.id, server)?;
        debug!(server_id = server.id, "server stored");
        Ok(())
    }

    pub fn get_server(&self, id: ServerId) -> StateResult<Option<ServerRecord>> {
        self.get_row(SERVERS, id)
    }

    pub fn list_servers(&self) -> StateResult<Vec<ServerRecord>> {
        self.list_rows(SERVERS)
    }

    /// Delete a server and its health check. Returns true if the server existed.
    pub fn delete_server(&self, id: ServerId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut servers = txn.open_table(SERVERS).map_err(map_err!(Table))?;
            existed = servers.remove(id).map_err(map_err!(Write))?.is_some();
            let mut checks = txn.open_table(HEALTH_CHECKS).map_err(map_err!(Table))?;
            checks.remove(id).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(server_id = id, existed, "server deleted");
        Ok(existed)
    }

    // ── Notification channels ──────────────────────────────────────

    pub fn put_channel(&self, channel: &NotificationChannel) -> StateResult<()> {
        self.put_row(CHANNELS, channel.id, channel)
    }

    pub fn get_channel(&self, id: ChannelId) -> StateResult<Option<NotificationChannel>> {
        self.get_row(CHANNELS, id)
    }

    pub fn list_channels(&self) -> StateResult<Vec<NotificationChannel>> {
        self.list_rows(CHANNELS)
    }

    /// Delete a channel and detach it from every health check that alerts
    /// to it. Returns true if the channel existed.
    pub fn delete_channel(&self, id: ChannelId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        let mut detached = 0usize;
        {
            let mut channels = txn.open_table(CHANNELS).map_err(map_err!(Table))?;
            existed = channels.remove(id).map_err(map_err!(Write))?.is_some();

            let mut checks = txn.open_table(HEALTH_CHECKS).map_err(map_err!(Table))?;
            let mut referencing = Vec::new();
            for entry in checks.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let config: HealthCheckConfig =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if config.notification_channel_id == Some(id) {
                    referencing.push(config);
                }
            }
            for mut config in referencing {
                config.notification_channel_id = None;
                let bytes = serde_json::to_vec(&config).map_err(map_err!(Serialize))?;
                checks
                    .insert(config.server_id, bytes.as_slice())
                    .map_err(map_err!(Write))?;
                detached += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(channel_id = id, existed, detached, "channel deleted");
        Ok(existed)
    }

    // ── Health checks ──────────────────────────────────────────────

    /// Insert or replace a health check. The config is validated first.
    pub fn put_health_check(&self, config: &HealthCheckConfig) -> StateResult<()> {
        config.validate()?;
        self.put_row(HEALTH_CHECKS, config.server_id, config)
    }

    pub fn get_health_check(&self, server_id: ServerId) -> StateResult<Option<HealthCheckConfig>> {
        self.get_row(HEALTH_CHECKS, server_id)
    }

    pub fn list_health_checks(&self) -> StateResult<Vec<HealthCheckConfig>> {
        self.list_rows(HEALTH_CHECKS)
    }

    pub fn delete_health_check(&self, server_id: ServerId) -> StateResult<bool> {
        self.delete_row(HEALTH_CHECKS, server_id)
    }

    /// Apply a client update to an existing health check.
    ///
    /// Interval and cooldown must be in range and the channel must exist
    /// (or be the "none" sentinel). Returns the stored config.
    pub fn update_health_check(
        &self,
        server_id: ServerId,
        update: &HealthCheckUpdate,
    ) -> StateResult<HealthCheckConfig> {
        if self.get_health_check(server_id)?.is_none() {
            return Err(StateError::NotFound(format!("health check for server {server_id}")));
        }

        let config = update.apply_to(server_id)?;
        if let Some(channel_id) = config.notification_channel_id {
            if self.get_channel(channel_id)?.is_none() {
                warn!(server_id, channel_id, "health check update names unknown channel");
                return Err(ConfigError::UnknownChannel(channel_id).into());
            }
        }

        self.put_row(HEALTH_CHECKS, server_id, &config)?;
        debug!(
            server_id,
            interval = config.interval_minutes,
            cooldown = config.notification_cooldown_minutes,
            channel = ?config.notification_channel_id,
            "health check updated"
        );
        Ok(config)
    }

    // ── Access keys ────────────────────────────────────────────────

    pub fn put_access_key(&self, key: &AccessKeyRecord) -> StateResult<()> {
        self.put_row(ACCESS_KEYS, key.id, key)
    }

    pub fn get_access_key(&self, id: AccessKeyId) -> StateResult<Option<AccessKeyRecord>> {
        self.get_row(ACCESS_KEYS, id)
    }

    pub fn list_access_keys(&self) -> StateResult<Vec<AccessKeyRecord>> {
        self.list_rows(ACCESS_KEYS)
    }

    pub fn delete_access_key(&self, id: AccessKeyId) -> StateResult<bool> {
        self.delete_row(ACCESS_KEYS, id)
    }

    /// Record the first observed traffic for a key.
    ///
    /// Only the first call writes. Returns `true` if this call set the
    /// timestamp, `false` if it was already set.
    pub fn mark_usage_started(&self, id: AccessKeyId, at: DateTime<Utc>) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let written;
        {
            let mut table = txn.open_table(ACCESS_KEYS).map_err(map_err!(Table))?;
            let bytes = table
                .get(id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StateError::NotFound(format!("access key {id}")))?;
            let mut key: AccessKeyRecord =
                serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;

            if key.usage_started_at.is_some() {
                written = false;
            } else {
                key.usage_started_at = Some(at);
                let value = serde_json::to_vec(&key).map_err(map_err!(Serialize))?;
                table
                    .insert(id, value.as_slice())
                    .map_err(map_err!(Write))?;
                written = true;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if written {
            debug!(key_id = id, %at, "access key usage started");
        }
        Ok(written)
    }
}

impl ConfigSource for StateStore {
    fn monitored_servers(&self) -> StateResult<Vec<(ServerRecord, HealthCheckConfig)>> {
        let mut pairs = Vec::new();
        for config in self.list_health_checks()? {
            match self.get_server(config.server_id)? {
                Some(server) => pairs.push((server, config)),
                None => {
                    warn!(server_id = config.server_id, "health check without server, skipping");
                }
            }
        }
        Ok(pairs)
    }
}
