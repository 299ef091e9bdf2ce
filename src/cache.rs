//! Shared key-value state with per-key expiry.
//!
//! Holds the password-reset markers and the refresh-token blacklist. The
//! Postgres backend makes the state visible to every worker process; the
//! in-memory backend serves a single process.
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use diesel::prelude::*;
use log::debug;

use crate::config::DbPool;
use crate::store::StoreResult;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now = *now + by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

pub trait ExpiringStore: Send + Sync {
    fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;
    /// The live value under `key`; expired entries read as absent.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn delete(&self, key: &str) -> StoreResult<()>;
}

pub struct MemoryExpiringStore {
    entries: DashMap<String, (String, DateTime<Utc>)>,
    clock: Arc<dyn Clock>,
}

impl MemoryExpiringStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: DashMap::new(), clock }
    }
}

impl ExpiringStore for MemoryExpiringStore {
    fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let expires_at = self.clock.now() + ttl;
        self.entries.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.1 > now {
                return Ok(Some(entry.0.clone()));
            }
        }
        if self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now).is_some() {
            debug!("Dropping expired entry {}", key);
        }
        Ok(None)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

pub struct PgExpiringStore {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl PgExpiringStore {
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn conn(&self) -> StoreResult<crate::store::pg::PooledConn> {
        Ok(self.pool.get()?)
    }
}

impl ExpiringStore for PgExpiringStore {
    fn set(&self, entry_key: &str, entry_value: &str, ttl: Duration) -> StoreResult<()> {
        use crate::schema::expiring_entry::dsl::*;
        let now = self.clock.now().naive_utc();
        let expiry = now + ttl;
        let mut conn = self.conn()?;
        diesel::delete(expiring_entry.filter(expires_at.le(now))).execute(&mut conn)?;
        diesel::insert_into(expiring_entry)
            .values((key.eq(entry_key), value.eq(entry_value), expires_at.eq(expiry)))
            .on_conflict(key)
            .do_update()
            .set((value.eq(entry_value), expires_at.eq(expiry)))
            .execute(&mut conn)?;
        Ok(())
    }

    fn get(&self, entry_key: &str) -> StoreResult<Option<String>> {
        use crate::schema::expiring_entry::dsl::*;
        let now = self.clock.now().naive_utc();
        let mut conn = self.conn()?;
        let found = expiring_entry
            .filter(key.eq(entry_key))
            .filter(expires_at.gt(now))
            .select(value)
            .first::<String>(&mut conn)
            .optional()?;
        Ok(found)
    }

    fn delete(&self, entry_key: &str) -> StoreResult<()> {
        use crate::schema::expiring_entry::dsl::*;
        let mut conn = self.conn()?;
        diesel::delete(expiring_entry.filter(key.eq(entry_key))).execute(&mut conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_with_the_clock() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryExpiringStore::new(clock.clone());
        store.set("otp_a@b.c", "123456", Duration::seconds(300)).unwrap();

        clock.advance(Duration::seconds(299));
        assert_eq!(store.get("otp_a@b.c").unwrap().as_deref(), Some("123456"));

        clock.advance(Duration::seconds(1));
        assert_eq!(store.get("otp_a@b.c").unwrap(), None);
    }

    #[test]
    fn set_overwrites_value_and_expiry() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryExpiringStore::new(clock.clone());
        store.set("k", "old", Duration::seconds(10)).unwrap();
        store.set("k", "new", Duration::seconds(100)).unwrap();
        clock.advance(Duration::seconds(50));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("new"));
        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }
}
