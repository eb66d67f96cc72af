//! Tenantry API server

use std::sync::Arc;

use anyhow::Context;
use tenantry_api::{
    routes::create_router,
    routing::{
        DomainNormalizer, HostResolver, PgTenantLookup, StaticTenantLookup, TenantEventListener,
        TenantLookup,
    },
    AppState, Config,
};
use tenantry_shared::create_lazy_pool;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("invalid configuration")?;
    let resolver_config = config.resolver_config();
    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not set; admin cache routes are unauthenticated");
    }

    // Tenant source
    let pool = match &config.database_url {
        Some(url) => Some(
            create_lazy_pool(url, config.database_max_connections)
                .context("invalid DATABASE_URL")?,
        ),
        None => None,
    };
    let lookup: Arc<dyn TenantLookup> = match (&pool, &config.tenants_file) {
        (Some(pool), _) => Arc::new(PgTenantLookup::new(pool.clone())),
        (None, Some(path)) => Arc::new(
            StaticTenantLookup::from_json_file(
                DomainNormalizer::new(resolver_config.normalizer.clone()),
                path,
            )
            .context("failed to load TENANTS_FILE")?,
        ),
        (None, None) => anyhow::bail!("no tenant source configured"),
    };

    let resolver = HostResolver::bootstrap(lookup, resolver_config)
        .await
        .context("failed to initialise tenant resolver")?;

    let mut state = AppState::new(config.clone(), resolver.clone());
    if let Some(pool) = pool {
        state = state.with_pool(pool);
    }

    // Event feed
    let mut background = Vec::new();
    if let Some(redis_url) = &config.redis_url {
        let listener = TenantEventListener::new(
            redis_url,
            config.tenant_events_channel.clone(),
            resolver.invalidator(),
        )
        .context("invalid REDIS_URL")?;
        background.push(tokio::spawn(listener.run()));

        let client = redis::Client::open(redis_url.as_str()).context("invalid REDIS_URL")?;
        match redis::aio::ConnectionManager::new(client).await {
            Ok(conn) => state = state.with_events(conn),
            Err(e) => tracing::warn!(error = %e, "Redis unavailable; admin flushes stay local"),
        }
    }

    // Expired entry purge
    if let Some(interval) = config.purge_interval() {
        let cache = Arc::clone(resolver.cache());
        background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired resolution cache entries");
                }
            }
        }));
    }

    let app = create_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "Tenantry API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    for task in background {
        task.abort();
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// `RUST_LOG` filter; `LOG_FORMAT=json` for structured output
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tenantry_api=info,tower_http=info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
