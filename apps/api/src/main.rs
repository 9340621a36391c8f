use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use availability_cell::{AvailabilityCellState, SlotFinder};
use booking_cell::BookingService;
use calendar_cell::{CalendarApi, HttpCalendarClient};
use clinic_cell::ClinicDirectory;
use flow_cell::{
    BookingFlowService, FlowCellState, FlowStateStore, InMemoryFlowStateStore,
    RedisFlowStateStore, ResilientStateStore,
};
use resilience_cell::{RateLimiter, RateLimiterConfig, RetryExecutor, RetryPolicy};
use shared_config::AppConfig;

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting booking engine API server");

    // Load configuration
    let config = AppConfig::from_env();

    let directory = ClinicDirectory::new();
    if let Some(path) = &config.clinic_config_path {
        load_clinics(&directory, path).await;
    }

    let calendar: Arc<dyn CalendarApi> = Arc::new(HttpCalendarClient::new(&config));
    let retry_policy = RetryPolicy::default().with_max_attempts(config.calendar_max_retries);

    let ttl = Duration::from_secs(config.flow_state_ttl_seconds);
    let store: Arc<dyn FlowStateStore> = match config.redis_url.as_deref() {
        Some(url) if !url.is_empty() => match RedisFlowStateStore::connect(url, ttl).await {
            Ok(redis) => Arc::new(ResilientStateStore::new(Arc::new(redis), ttl)),
            Err(e) => {
                warn!("Redis unavailable ({}), keeping flow state in memory only", e);
                Arc::new(InMemoryFlowStateStore::new(ttl))
            }
        },
        _ => Arc::new(InMemoryFlowStateStore::new(ttl)),
    };

    let flow = BookingFlowService::new(
        directory.clone(),
        SlotFinder::new(calendar.clone(), RetryExecutor::new(retry_policy.clone())),
        BookingService::new(calendar.clone(), RetryExecutor::new(retry_policy.clone())),
        store,
    );
    let limiter = RateLimiter::new(RateLimiterConfig {
        capacity: config.outbound_messages_per_minute,
        refill_amount: config.outbound_messages_per_minute,
        refill_interval: Duration::from_secs(60),
    });

    let flow_state = FlowCellState {
        flow: Arc::new(flow),
        limiter: Arc::new(limiter),
    };
    let availability_state = AvailabilityCellState {
        directory,
        finder: Arc::new(SlotFinder::new(calendar, RetryExecutor::new(retry_policy))),
    };

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(flow_state, availability_state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .await
        .unwrap();
}

/// Seeds the clinic directory from a JSON file holding an array of clinic
/// configuration documents. Entries that fail normalization are skipped so
/// one bad clinic cannot keep the rest offline.
async fn load_clinics(directory: &ClinicDirectory, path: &str) {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Could not read clinic configuration {}: {}", path, e);
            return;
        }
    };

    let documents: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(documents) => documents,
        Err(e) => {
            warn!("Clinic configuration {} is not a JSON array: {}", path, e);
            return;
        }
    };

    for document in &documents {
        match clinic_cell::normalize_profile(document) {
            Ok(profile) => {
                info!("Loaded clinic {}", profile.clinic_id);
                directory.upsert(profile).await;
            }
            Err(e) => warn!("Skipping invalid clinic configuration entry: {}", e),
        }
    }
}
