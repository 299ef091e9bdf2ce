use std::sync::Arc;

use crate::cache::{Clock, ExpiringStore, MemoryExpiringStore, PgExpiringStore, SystemClock};
use crate::config::{AppConfig, DbPool};
use crate::mailer::Mailer;
use crate::store::memory::MemoryStore;
use crate::store::pg::PgStore;
use crate::store::{AreaStore, ComplaintStore, ConnectionStore, IdentityStore, ValveStore};

/// Everything a handler reaches through `web::Data<AppState>`.
pub struct AppState {
    pub identity: Arc<dyn IdentityStore>,
    pub areas: Arc<dyn AreaStore>,
    pub complaints: Arc<dyn ComplaintStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub valves: Arc<dyn ValveStore>,
    pub cache: Arc<dyn ExpiringStore>,
    pub mailer: Arc<Mailer>,
    pub clock: Arc<dyn Clock>,
    pub config: AppConfig,
}

impl AppState {
    pub fn with_pg(pool: DbPool, config: AppConfig, mailer: Mailer) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(PgStore::new(pool.clone()));
        Self {
            identity: store.clone(),
            areas: store.clone(),
            complaints: store.clone(),
            connections: store.clone(),
            valves: store,
            cache: Arc::new(PgExpiringStore::new(pool, clock.clone())),
            mailer: Arc::new(mailer),
            clock,
            config,
        }
    }

    /// Single-process state for development and tests; nothing survives a restart.
    pub fn in_memory(config: AppConfig, clock: Arc<dyn Clock>, mailer: Mailer) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            identity: store.clone(),
            areas: store.clone(),
            complaints: store.clone(),
            connections: store.clone(),
            valves: store,
            cache: Arc::new(MemoryExpiringStore::new(clock.clone())),
            mailer: Arc::new(mailer),
            clock,
            config,
        }
    }
}
