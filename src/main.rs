//! `opqueue-server`: boots the queue, agent lock, handler registry, realtime
//! hub, and HTTP/WS surface described by `SPEC_FULL.md`.
//!
//! The ERP automation driver and local data store are opaque collaborators
//! per this crate's Non-goals; this binary wires in stub implementations so
//! the service boots end-to-end. A real deployment embeds this crate as a
//! library and supplies its own `ErpDriver`/`DataStore` to
//! `HandlerRegistry::register`.

use opqueue::agent_lock::AgentLock;
use opqueue::config::OperationQueueConfig;
use opqueue::handlers::operations::{DataStore, DownloadHandler, ErpDriver, SyncHandler, WriteHandler, WriteKind};
use opqueue::handlers::HandlerRegistry;
use opqueue::jobs::{DownloadKind, JobShutdownCoordinator, OperationType, Queue, RedisQueue, SyncKind};
use opqueue::processor::{Processor, ProcessorConfig};
use opqueue::realtime::{RealtimeHub, RealtimeHubConfig};
use opqueue::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

struct UnconfiguredDriver;

#[async_trait::async_trait]
impl ErpDriver for UnconfiguredDriver {
    async fn submit_order(&self, _user_id: &str, _payload: &serde_json::Value) -> Result<serde_json::Value, String> {
        Err("no ErpDriver configured for this deployment".into())
    }
    async fn create_customer(&self, _user_id: &str, _payload: &serde_json::Value) -> Result<serde_json::Value, String> {
        Err("no ErpDriver configured for this deployment".into())
    }
    async fn send_to_remote(&self, _user_id: &str, _payload: &serde_json::Value) -> Result<serde_json::Value, String> {
        Err("no ErpDriver configured for this deployment".into())
    }
    async fn download_pdf(&self, _user_id: &str, _kind: &str) -> Result<Vec<u8>, String> {
        Err("no ErpDriver configured for this deployment".into())
    }
    async fn sync(&self, _user_id: &str, _kind: &str) -> Result<serde_json::Value, String> {
        Err("no ErpDriver configured for this deployment".into())
    }
}

struct UnconfiguredStore;

#[async_trait::async_trait]
impl DataStore for UnconfiguredStore {
    async fn upsert_from_pdf(&self, _user_id: &str, _kind: &str, _bytes: &[u8]) -> Result<u64, String> {
        Err("no DataStore configured for this deployment".into())
    }
    async fn upsert_from_sync(&self, _user_id: &str, _kind: &str, _data: &serde_json::Value) -> Result<u64, String> {
        Err("no DataStore configured for this deployment".into())
    }
}

fn build_registry(driver: Arc<dyn ErpDriver>, store: Arc<dyn DataStore>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(OperationType::SubmitOrder, Arc::new(WriteHandler::new(driver.clone(), WriteKind::SubmitOrder)));
    registry.register(
        OperationType::CreateCustomer,
        Arc::new(WriteHandler::new(driver.clone(), WriteKind::CreateCustomer)),
    );
    registry.register(
        OperationType::SendToRemote,
        Arc::new(WriteHandler::new(driver.clone(), WriteKind::SendToRemote)),
    );

    for kind in [
        DownloadKind::Orders,
        DownloadKind::Customers,
        DownloadKind::Products,
        DownloadKind::Prices,
        DownloadKind::Ddt,
        DownloadKind::Invoices,
    ] {
        let label = OperationType::DownloadPdf(kind).key();
        registry.register(
            OperationType::DownloadPdf(kind),
            Arc::new(DownloadHandler::new(driver.clone(), store.clone(), label)),
        );
    }

    for kind in [
        SyncKind::Orders,
        SyncKind::Customers,
        SyncKind::Products,
        SyncKind::Prices,
        SyncKind::Ddt,
        SyncKind::Invoices,
    ] {
        let label = OperationType::Sync(kind).key();
        registry.register(OperationType::Sync(kind), Arc::new(SyncHandler::new(driver.clone(), store.clone(), label)));
    }

    registry
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperationQueueConfig::load()?;
    opqueue::observability::init(&config.log_level)?;

    info!(bind = %config.http_bind_addr, "starting opqueue-server");

    let redis_cfg = deadpool_redis::Config::from_url(&config.queue_url);
    let pool = redis_cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
    let queue: Arc<dyn Queue> = Arc::new(RedisQueue::new(pool, config.lease_duration(), "opqueue"));

    let lock = AgentLock::new();
    let hub = RealtimeHub::new(RealtimeHubConfig {
        buffer_size: config.ws_buffer_size,
        buffer_ttl: config.ws_buffer_ttl(),
        heartbeat_interval: config.ws_heartbeat(),
    });
    let registry = build_registry(Arc::new(UnconfiguredDriver), Arc::new(UnconfiguredStore));

    let shutdown = JobShutdownCoordinator::new();
    let cancellation = shutdown.cancellation_manager().clone();

    let state = AppState::new(
        queue.clone(),
        lock.clone(),
        registry.clone(),
        hub.clone(),
        config.clone(),
        cancellation.clone(),
    );

    let processor_config = ProcessorConfig {
        preemption_deadline: config.preemption_deadline(),
        preemption_poll_interval: config.preemption_poll_interval(),
        lease_duration: config.lease_duration(),
    };

    let worker_count = std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
    let mut workers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let processor = Processor::new(
            queue.clone(),
            lock.clone(),
            registry.clone(),
            hub.clone(),
            processor_config,
            cancellation.clone(),
        );
        let token = shutdown.shutdown_token().clone();
        workers.push(tokio::spawn(async move { processor.run(token).await }));
    }

    let app = opqueue::http::build_router(state);
    let addr: SocketAddr = config.http_bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let serve = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>());
    tokio::select! {
        result = serve => {
            if let Err(err) = result {
                error!(error = %err, "server exited with error");
            }
        }
        () = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    // Signals every in-flight job's registered cancellation trigger and
    // waits (up to the grace period) for each processor to ack and
    // unregister it. By the time this resolves the worker loops have already
    // looped back around to their now-cancelled shutdown token and returned;
    // `abort` below is just a backstop for a worker wedged in `queue.lease()`.
    let result = shutdown.shutdown(config.shutdown_grace()).await;
    info!(?result, "job system shutdown complete");
    for worker in workers {
        worker.abort();
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
