//! Stock ledger service entry point.

use std::process::ExitCode;

use api::config::Config;
use intake::{EventIntake, RedisStreamsSource};
use ledger::MutationSerializer;
use ledger_store::PostgresLedgerStore;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn describe_metrics() {
    metrics::describe_counter!(
        "ledger_mutations_total",
        "Mutations applied to the ledger, by kind and origin"
    );
    metrics::describe_histogram!(
        "ledger_mutation_duration_seconds",
        metrics::Unit::Seconds,
        "Time spent applying one mutation to the store"
    );
    metrics::describe_gauge!(
        "ledger_active_items",
        "Items with queued or running mutations"
    );
    metrics::describe_counter!(
        "ledger_store_unavailable_total",
        "Store operations that failed after exhausting retries"
    );
    metrics::describe_counter!(
        "intake_events_total",
        "Order events handled by the intake, by outcome"
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Load configuration; anything missing or malformed is fatal
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "service failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    describe_metrics();

    // 4. Connect the store and create the schema
    let store = PostgresLedgerStore::connect(&config.database).await?;
    store.run_migrations().await?;

    // 5. One serializer shared by the gateway and the intake
    let serializer = MutationSerializer::new(store);

    // 6. Start the event intake
    let source = RedisStreamsSource::connect(&config.event_bus).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let intake = EventIntake::new(serializer.clone(), source, config.intake.clone());
    let intake_task = tokio::spawn(intake.run(shutdown_rx));

    // 7. Build the application and serve
    let app = api::create_app(api::create_state(serializer), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting inventory service");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 8. Stop the intake between polls
    let _ = shutdown_tx.send(true);
    intake_task.await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}
