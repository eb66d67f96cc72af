//! Shared application state

use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::config::Config;
use crate::routing::HostResolver;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub resolver: HostResolver,
    /// Present when tenants come from Postgres
    pub pool: Option<PgPool>,
    /// Present when the Redis event feed is configured
    pub events: Option<ConnectionManager>,
}

impl AppState {
    pub fn new(config: Config, resolver: HostResolver) -> Self {
        Self {
            config: Arc::new(config),
            resolver,
            pool: None,
            events: None,
        }
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_events(mut self, events: ConnectionManager) -> Self {
        self.events = Some(events);
        self
    }
}
