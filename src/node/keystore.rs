//! Local in-memory key-value table
//!
//! Deletes leave a tombstone for a while, so a stale copy handed off by a
//! former owner cannot bring the key back.

use crate::common::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Table {
    values: HashMap<String, String>,
    /// Recently deleted keys and when
    deleted: HashMap<String, Instant>,
}

/// Keys owned (or last written) on this node. No versioning.
#[derive(Debug)]
pub struct KeyStore {
    table: RwLock<Table>,
    tombstone_ttl: Duration,
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::with_tombstone_ttl(DEFAULT_TOMBSTONE_TTL)
    }
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tombstone_ttl(tombstone_ttl: Duration) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            tombstone_ttl,
        }
    }

    /// Insert or overwrite.
    pub fn set(&self, key: &str, value: impl Into<String>) -> Result<()> {
        validate_key(key)?;
        let mut table = self.table.write().unwrap();
        table.deleted.remove(key);
        table.values.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Insert unless the key holds a value or was deleted within the
    /// tombstone TTL. Returns whether the value was stored.
    pub fn insert_if_absent(&self, key: &str, value: impl Into<String>) -> Result<bool> {
        validate_key(key)?;
        let mut table = self.table.write().unwrap();
        if table.values.contains_key(key) {
            return Ok(false);
        }
        match table.deleted.get(key) {
            Some(at) if at.elapsed() < self.tombstone_ttl => return Ok(false),
            Some(_) => {
                table.deleted.remove(key);
            }
            None => {}
        }
        table.values.insert(key.to_string(), value.into());
        Ok(true)
    }

    pub fn get(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        self.table
            .read()
            .unwrap()
            .values
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Delete `key`. The tombstone is recorded even when the key is absent
    /// here, since a former owner may still hold a copy.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.take(key).map(|_| ())
    }

    /// Remove and return the value, leaving a tombstone.
    pub fn take(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        let mut table = self.table.write().unwrap();
        let ttl = self.tombstone_ttl;
        table.deleted.retain(|_, at| at.elapsed() < ttl);
        table.deleted.insert(key.to_string(), Instant::now());
        table
            .values
            .remove(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Remove `key` only if it still holds `expected`. No tombstone: the key
    /// lives on at its new owner.
    pub fn remove_if(&self, key: &str, expected: &str) -> bool {
        let mut table = self.table.write().unwrap();
        if table.values.get(key).map(String::as_str) == Some(expected) {
            table.values.remove(key);
            true
        } else {
            false
        }
    }

    /// Copy of every entry.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.table
            .read()
            .unwrap()
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().unwrap().values.is_empty()
    }
}

pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::Validation("key must not be empty".into()));
    }
    Ok(())
}
