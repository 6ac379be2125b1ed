use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::legacy::LegacyIds;
use crate::filter::{ContentFilter, WordListFilter};
use crate::keys::{SessionKeys, StaticKeys};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Everything the model needs from its host, passed in explicitly.
///
/// Cloning is cheap; every clone shares the same pool and collaborators.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub filter: Arc<dyn ContentFilter>,
    pub keys: Arc<dyn SessionKeys>,
    pub legacy: Arc<LegacyIds>,
}

impl AppState {
    /// Builds state with the system clock, the configured word filter and static keys.
    ///
    /// Expects migrations to have been run already.
    pub fn new(db: DbPool, config: Config) -> anyhow::Result<Self> {
        let legacy = {
            let conn = db.get()?;
            LegacyIds::load(&conn)?
        };
        Ok(Self {
            filter: Arc::new(WordListFilter::new(&config.filter.words)),
            keys: Arc::new(StaticKeys::new(config.server.pubkey.clone())),
            clock: Arc::new(SystemClock),
            legacy: Arc::new(legacy),
            config: Arc::new(config),
            db,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn ContentFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_keys(mut self, keys: Arc<dyn SessionKeys>) -> Self {
        self.keys = keys;
        self
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }
}
