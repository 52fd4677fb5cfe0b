//! `taskbridge-service`: wires the adapters together, runs the Discover and
//! ScheduleDuePolls timer loops plus the event-bus dispatch loop as `tokio`
//! tasks, and exposes a minimal health surface.
//!
//! Follows the familiar `crates/api::main` shape: read config, build
//! services, bind a listener, serve — with the addition of the background
//! loops this workflow engine needs beyond a request/response API.

mod health;
mod wiring;

use std::sync::Arc;

use taskbridge_infra::event_bus::InMemoryEventBus;
use taskbridge_infra::event_store::{InMemoryEventStore, PostgresEventStore};
use taskbridge_infra::external_client::HttpExternalServiceClient;
use taskbridge_infra::idempotency::{InMemoryIdempotencyStore, PostgresIdempotencyStore};
use taskbridge_infra::intake_repo::{InMemoryIntakeRepository, PostgresIntakeRepository};
use taskbridge_infra::projection_repo::{InMemoryProjectionRepository, PostgresProjectionRepository};
use taskbridge_ports::{CancelSignal, Clock, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskbridge_observability::init();

    let workflow_config = taskbridge_config::load_workflow_config()?;
    let service_config = taskbridge_config::load_service_config()?;

    let cancel = CancelSignal::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received shutdown signal");
                cancel.cancel();
            }
        });
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let bus = Arc::new(InMemoryEventBus::default());
    let external = Arc::new(HttpExternalServiceClient::new(
        service_config.external_service_url.clone(),
        workflow_config.external_call_timeout,
    )?);

    let listener = tokio::net::TcpListener::bind(&service_config.bind_addr).await?;
    tracing::info!(addr = %service_config.bind_addr, "health surface listening");

    if service_config.use_persistent_stores {
        let database_url = service_config
            .database_url
            .clone()
            .expect("load_service_config guarantees DATABASE_URL when use_persistent_stores is set");
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await?;

        for schema in [
            PostgresEventStore::SCHEMA,
            PostgresProjectionRepository::SCHEMA,
            PostgresIntakeRepository::SCHEMA,
            PostgresIdempotencyStore::SCHEMA,
        ] {
            sqlx::query(schema).execute(&pool).await?;
        }

        let workers = wiring::build_workers(
            Arc::new(PostgresEventStore::new(pool.clone())),
            Arc::new(PostgresProjectionRepository::new(pool.clone())),
            Arc::new(PostgresIntakeRepository::new(pool.clone())),
            Arc::new(PostgresIdempotencyStore::new(pool)),
            external,
            bus,
            workflow_config.clone(),
        );
        run(workers, clock, workflow_config, cancel, listener).await
    } else {
        tracing::warn!("USE_PERSISTENT_STORES is unset; running with in-memory adapters (state is lost on restart)");
        let workers = wiring::build_workers(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryProjectionRepository::new()),
            Arc::new(InMemoryIntakeRepository::new()),
            Arc::new(InMemoryIdempotencyStore::new()),
            external,
            bus,
            workflow_config.clone(),
        );
        run(workers, clock, workflow_config, cancel, listener).await
    }
}

/// Spawn every background loop plus the health server, then block until
/// `cancel` fires (signal handler) and everything has wound down.
async fn run<Es, Pr, Ir, Id, Ex>(
    workers: wiring::Workers<Es, Pr, Ir, Id, Ex>,
    clock: Arc<dyn Clock>,
    workflow_config: taskbridge_ports::WorkflowConfig,
    cancel: CancelSignal,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()>
where
    Es: taskbridge_ports::EventStore + Send + Sync + 'static,
    Pr: taskbridge_ports::ProjectionRepository + Send + Sync + 'static,
    Ir: taskbridge_ports::IntakeRepository + Send + Sync + 'static,
    Id: taskbridge_ports::IdempotencyStore + Send + Sync + 'static,
    Ex: taskbridge_ports::ExternalServiceClient + Send + Sync + 'static,
{
    let workers = Arc::new(workers);

    let discover_handle = tokio::spawn(wiring::discover_loop(
        workers.discover.clone(),
        clock.clone(),
        workflow_config.discover_interval,
        cancel.child(),
    ));
    let schedule_handle = tokio::spawn(wiring::schedule_due_polls_loop(
        workers.schedule.clone(),
        clock.clone(),
        workflow_config.schedule_poll_interval,
        cancel.child(),
    ));
    let dispatch_handle = tokio::spawn(wiring::dispatch_loop(
        workers.clone(),
        clock.clone(),
        cancel.child(),
    ));

    let app = health::router();
    let serve_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
            .await
    });

    cancel.cancelled().await;
    tracing::info!("shutting down");

    let _ = tokio::join!(discover_handle, schedule_handle, dispatch_handle);
    server_handle.await??;

    Ok(())
}
