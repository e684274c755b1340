use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mos_lead_engine::compliance::{ComplianceGate, DncRegistry, HttpDncRegistry, PatternDncRegistry};
use mos_lead_engine::config::Config;
use mos_lead_engine::db::Database;
use mos_lead_engine::db_storage::{LeadStore, PgLeadStore};
use mos_lead_engine::dispatch::{DispatchService, HttpDialer};
use mos_lead_engine::enrichment::HttpEnrichmentProvider;
use mos_lead_engine::handlers::{self, AppState};
use mos_lead_engine::nurture::{NurtureRegistry, PgNurtureStore};
use mos_lead_engine::pipeline::LeadPipeline;
use mos_lead_engine::queue::{QueueSettings, WorkQueue};
use mos_lead_engine::scoring::ScoringPolicy;

/// Main entry point for the application.
///
/// Initializes tracing, configuration, the database pool, provider clients,
/// the work queue and the HTTP routes, then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mos_lead_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url).await?;
    db.ensure_schema().await?;
    tracing::info!("Database connection pool established");

    let registry: Arc<dyn DncRegistry> = match config.dnc_registry_url.clone() {
        Some(url) => Arc::new(HttpDncRegistry::new(url, config.provider_timeout)?),
        None => Arc::new(PatternDncRegistry::default()),
    };
    let gate = ComplianceGate::new(registry);

    let dialer = HttpDialer::new(
        config.dialer_base_url.clone(),
        config.dialer_token.clone(),
        config.operator_phone.clone(),
        config.provider_timeout,
    )?;
    let dispatch = DispatchService::new(gate.clone(), Arc::new(dialer), config.provider_timeout);

    let enrichment = HttpEnrichmentProvider::new(
        config.enrichment_base_url.clone(),
        config.enrichment_api_key.clone(),
        config.provider_timeout,
    )?;
    tracing::info!("Enrichment provider initialized: {}", config.enrichment_base_url);

    let scoring = match config.scoring_policy_path {
        Some(ref path) => ScoringPolicy::load(path)?,
        None => {
            tracing::info!("No scoring policy file configured, using default weights");
            ScoringPolicy::default()
        }
    };

    let store: Arc<dyn LeadStore> = Arc::new(PgLeadStore::new(db.pool.clone()));
    let pipeline = Arc::new(LeadPipeline::new(
        store.clone(),
        Arc::new(enrichment),
        scoring,
        dispatch,
        config.provider_timeout,
    ));

    let (queue, _dispatcher) = WorkQueue::start(pipeline.clone(), QueueSettings::from(&config));

    let nurture = Arc::new(NurtureRegistry::new(
        store,
        Arc::new(PgNurtureStore::new(db.pool.clone())),
    ));

    let app_state = Arc::new(AppState {
        pipeline,
        queue,
        nurture,
        gate,
    });

    let app = handlers::router(app_state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
