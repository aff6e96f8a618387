//! Leadgate - affiliate lead management service.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leadgate::clock::{Clock, SystemClock};
use leadgate::config::AppConfig;
use leadgate::diag::{DailyFileSink, DiagnosticSink};
use leadgate::payout::PayoutResolver;
use leadgate::pipeline::{
    AreaCodeTable, BusinessValidator, DuplicateDetector, HttpMobileLookup, LeadPipeline,
    MobileLookup, NoLookup, PhoneNormalizer,
};
use leadgate::postback::{HttpTransport, PostbackDispatcher};
use leadgate::state::AppState;
use leadgate::store::{PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Some(client),
            Err(err) => {
                tracing::warn!(error = %err, "NATS unreachable, event publishing disabled");
                None
            }
        },
        None => None,
    };

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let diag: Arc<dyn DiagnosticSink> = Arc::new(DailyFileSink::new(&config.diag_dir));
    let lookup: Arc<dyn MobileLookup> = match &config.mobile_lookup_url {
        Some(url) => Arc::new(HttpMobileLookup::new(url.clone())?),
        None => {
            tracing::warn!("MOBILE_LOOKUP_URL unset, numbers will assemble as landlines");
            Arc::new(NoLookup)
        }
    };

    let pipeline = LeadPipeline::new(
        store.clone(),
        PhoneNormalizer::new(AreaCodeTable::argentina(), lookup, diag.clone()),
        DuplicateDetector::new(store.clone(), clock.clone(), diag),
        BusinessValidator::new(store.clone()),
        clock,
    );
    let dispatcher = PostbackDispatcher::new(store.clone(), Arc::new(HttpTransport::new()?));

    let state = AppState {
        pipeline: Arc::new(pipeline),
        dispatcher: Arc::new(dispatcher),
        payouts: Arc::new(PayoutResolver::new(store.clone())),
        store,
        nats,
    };

    let app = leadgate::http::router(state);
    tracing::info!("🚀 Leadgate listening on 0.0.0.0:{}", config.port);
    axum::serve(
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?,
        app,
    )
    .await?;
    Ok(())
}
