//! Process entry point: loads configuration, wires the scheduling core
//! (store, clock, executor, scheduler) to the Axum REST surface, and drives
//! graceful shutdown on `SIGINT`/`SIGTERM`.
use std::sync::Arc;
use std::time::Duration as StdDuration;

use envconfig::Envconfig;
use ksana_core::{Clock, Executor, JobStore, JsonStore, RealClock, Scheduler};
use ksana_health::HealthRegistry;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod dto;
mod error;
mod metrics;
mod routes;
mod state;

use auth::ApiKeyStore;
use config::Config;
use state::AppState;

const HEALTH_HEARTBEAT: StdDuration = StdDuration::from_secs(10);

fn health_deadline() -> time::Duration {
    time::Duration::seconds(30)
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("invalid configuration");
    init_tracing(&config.log_level);

    let data_dir = config.resolved_data_dir();
    let store: Arc<dyn JobStore> = Arc::new(JsonStore::new(&data_dir));
    store
        .load()
        .await
        .unwrap_or_else(|err| panic!("failed to load job store at {data_dir}: {err}"));

    let clock: Arc<dyn Clock> = Arc::new(RealClock);
    let executor = Arc::new(Executor::new(
        config.workers,
        config.default_timeout.as_std(),
        store.clone(),
        clock.clone(),
    ));

    let scheduler = Scheduler::new(store.clone(), executor.clone(), clock);
    scheduler
        .start()
        .await
        .expect("failed to start scheduler against the loaded job store");

    let health = HealthRegistry::new("ksana");
    let store_health = health.register("store".to_owned(), health_deadline()).await;
    let scheduler_health = health
        .register("scheduler".to_owned(), health_deadline())
        .await;
    let executor_health = health
        .register("executor".to_owned(), health_deadline())
        .await;
    let http_health = health.register("http".to_owned(), health_deadline()).await;

    spawn_health_heartbeat(store.clone(), store_health, scheduler_health, executor_health);

    let api_keys = ApiKeyStore::load(&config.api_keys_file).await;

    let state = AppState {
        store,
        scheduler: scheduler.clone(),
        health,
    };

    let app = routes::build_router(state, api_keys, config.cors_origins());

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .unwrap_or_else(|err| panic!("failed to bind {}: {err}", config.bind_addr()));
    http_health.report_healthy().await;
    tracing::info!(addr = %config.bind_addr(), "ksana listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("http server exited with an error");

    tracing::info!("stopping scheduler");
    scheduler.stop();

    let drained = executor
        .shutdown(config.shutdown_timeout.as_std())
        .await;
    if !drained {
        tracing::warn!("shutdown timeout elapsed with executions still in flight");
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

/// The scheduler coordinator and executor don't expose per-iteration
/// instrumentation hooks into `ksana-core` (keeping that crate ignorant of
/// the ambient health-reporting stack, see DESIGN.md) — so liveness here is
/// a periodic heartbeat backed by a cheap real probe for the store
/// (`list()`) and an assumption of liveness for the scheduler/executor
/// tasks, which is sound as long as this task itself keeps running in the
/// same process.
fn spawn_health_heartbeat(
    store: Arc<dyn JobStore>,
    store_health: ksana_health::HealthHandle,
    scheduler_health: ksana_health::HealthHandle,
    executor_health: ksana_health::HealthHandle,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEALTH_HEARTBEAT);
        loop {
            ticker.tick().await;
            match store.list().await {
                Ok(_) => store_health.report_healthy().await,
                Err(err) => {
                    tracing::warn!(error = %err, "store health probe failed");
                }
            }
            scheduler_health.report_healthy().await;
            executor_health.report_healthy().await;
        }
    });
}

async fn shutdown_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("shutdown signal received, draining");
}
