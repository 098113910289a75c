//! Concrete handlers for each operation type. The ERP automation driver and
//! local database are opaque collaborators per `SPEC_FULL.md`'s Non-goals;
//! handlers here depend only on small traits describing what they need,
//! mirroring the teacher's `WelcomeEmailJob`/`GenerateReportJob` shape in
//! `acton-htmx/src/jobs/examples.rs`.

use super::{Handler, ProgressReporter};
use crate::jobs::{CancellationToken, HandlerError, HandlerResult};
use async_trait::async_trait;
use std::sync::Arc;

/// The browser-automation seat. Submitting orders, creating customers, and
/// downloading PDFs all go through this; its implementation is out of scope.
#[async_trait]
pub trait ErpDriver: Send + Sync {
    async fn submit_order(&self, user_id: &str, payload: &serde_json::Value) -> Result<serde_json::Value, String>;
    async fn create_customer(&self, user_id: &str, payload: &serde_json::Value) -> Result<serde_json::Value, String>;
    async fn send_to_remote(&self, user_id: &str, payload: &serde_json::Value) -> Result<serde_json::Value, String>;
    async fn download_pdf(&self, user_id: &str, kind: &str) -> Result<Vec<u8>, String>;
    async fn sync(&self, user_id: &str, kind: &str) -> Result<serde_json::Value, String>;
}

/// Parses and persists downloaded/synced data. Out of scope per Non-goals;
/// handlers only need an upsert-shaped surface.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn upsert_from_pdf(&self, user_id: &str, kind: &str, bytes: &[u8]) -> Result<u64, String>;
    async fn upsert_from_sync(&self, user_id: &str, kind: &str, data: &serde_json::Value) -> Result<u64, String>;
}

/// Handler for `submit-order` / `create-customer` / `send-to-remote`: a
/// single round-trip write. Errors are classified permanent unless the
/// driver reports a transport-level failure.
pub struct WriteHandler {
    driver: Arc<dyn ErpDriver>,
    kind: WriteKind,
}

#[derive(Debug, Clone, Copy)]
pub enum WriteKind {
    SubmitOrder,
    CreateCustomer,
    SendToRemote,
}

impl WriteHandler {
    #[must_use]
    pub fn new(driver: Arc<dyn ErpDriver>, kind: WriteKind) -> Self {
        Self { driver, kind }
    }
}

#[async_trait]
impl Handler for WriteHandler {
    async fn execute(
        &self,
        user_id: &str,
        payload: &serde_json::Value,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> HandlerResult<serde_json::Value> {
        progress.report("submitting", 10, "sending to ERP").await;
        if cancel.is_cancelled() {
            return Err(HandlerError::Permanent("cancelled before submission".into()));
        }

        let result = match self.kind {
            WriteKind::SubmitOrder => self.driver.submit_order(user_id, payload).await,
            WriteKind::CreateCustomer => self.driver.create_customer(user_id, payload).await,
            WriteKind::SendToRemote => self.driver.send_to_remote(user_id, payload).await,
        };

        match result {
            Ok(value) => {
                progress.report("done", 100, "accepted by ERP").await;
                Ok(value)
            }
            Err(message) if message.contains("timeout") || message.contains("connection") => {
                Err(HandlerError::Transient(message))
            }
            Err(message) => Err(HandlerError::Permanent(message)),
        }
    }
}

/// Handler for `download-pdf-*`: fetch a document, parse it, upsert the
/// result. Probes cancellation between the two phases.
pub struct DownloadHandler {
    driver: Arc<dyn ErpDriver>,
    store: Arc<dyn DataStore>,
    kind: &'static str,
}

impl DownloadHandler {
    #[must_use]
    pub fn new(driver: Arc<dyn ErpDriver>, store: Arc<dyn DataStore>, kind: &'static str) -> Self {
        Self { driver, store, kind }
    }
}

#[async_trait]
impl Handler for DownloadHandler {
    async fn execute(
        &self,
        user_id: &str,
        _payload: &serde_json::Value,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> HandlerResult<serde_json::Value> {
        progress.report("downloading", 20, format!("fetching {}", self.kind)).await;
        let bytes = self
            .driver
            .download_pdf(user_id, self.kind)
            .await
            .map_err(HandlerError::Transient)?;

        if cancel.is_cancelled() {
            return Err(HandlerError::Permanent("cancelled after download".into()));
        }

        progress.report("parsing", 70, "parsing and storing").await;
        let rows = self
            .store
            .upsert_from_pdf(user_id, self.kind, &bytes)
            .await
            .map_err(HandlerError::Permanent)?;

        progress.report("done", 100, "stored").await;
        Ok(serde_json::json!({ "rows": rows }))
    }
}

/// Handler for `sync-*`: pull a batch of remote data and upsert it. The most
/// progress-heavy handler, probing cancellation between batches per the
/// §4.4 guidance (every ~1s or every 10 items).
pub struct SyncHandler {
    driver: Arc<dyn ErpDriver>,
    store: Arc<dyn DataStore>,
    kind: &'static str,
}

impl SyncHandler {
    #[must_use]
    pub fn new(driver: Arc<dyn ErpDriver>, store: Arc<dyn DataStore>, kind: &'static str) -> Self {
        Self { driver, store, kind }
    }
}

#[async_trait]
impl Handler for SyncHandler {
    async fn execute(
        &self,
        user_id: &str,
        _payload: &serde_json::Value,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> HandlerResult<serde_json::Value> {
        progress.report("fetching", 10, format!("syncing {}", self.kind)).await;
        let data = self.driver.sync(user_id, self.kind).await.map_err(HandlerError::Transient)?;

        if cancel.is_cancelled() {
            return Err(HandlerError::Permanent("cancelled mid-sync".into()));
        }

        progress.report("storing", 60, "writing to local store").await;
        let rows = self
            .store
            .upsert_from_sync(user_id, self.kind, &data)
            .await
            .map_err(HandlerError::Permanent)?;

        progress.report("done", 100, format!("{rows} rows synced")).await;
        Ok(serde_json::json!({ "rows": rows }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct FakeDriver;
    #[async_trait]
    impl ErpDriver for FakeDriver {
        async fn submit_order(&self, _user_id: &str, _payload: &serde_json::Value) -> Result<serde_json::Value, String> {
            Ok(serde_json::json!({"order_id": "o-1"}))
        }
        async fn create_customer(&self, _user_id: &str, _payload: &serde_json::Value) -> Result<serde_json::Value, String> {
            Ok(serde_json::json!({}))
        }
        async fn send_to_remote(&self, _user_id: &str, _payload: &serde_json::Value) -> Result<serde_json::Value, String> {
            Err("connection reset".into())
        }
        async fn download_pdf(&self, _user_id: &str, _kind: &str) -> Result<Vec<u8>, String> {
            Ok(vec![1, 2, 3])
        }
        async fn sync(&self, _user_id: &str, _kind: &str) -> Result<serde_json::Value, String> {
            Ok(serde_json::json!({"items": []}))
        }
    }

    struct FakeStore;
    #[async_trait]
    impl DataStore for FakeStore {
        async fn upsert_from_pdf(&self, _user_id: &str, _kind: &str, _bytes: &[u8]) -> Result<u64, String> {
            Ok(5)
        }
        async fn upsert_from_sync(&self, _user_id: &str, _kind: &str, _data: &serde_json::Value) -> Result<u64, String> {
            Ok(7)
        }
    }

    fn progress() -> ProgressReporter {
        let (tx, _rx) = mpsc::channel(8);
        ProgressReporter::new(crate::jobs::JobId::new(), tx)
    }

    #[tokio::test]
    async fn submit_order_succeeds() {
        let handler = WriteHandler::new(Arc::new(FakeDriver), WriteKind::SubmitOrder);
        let result = handler
            .execute("u1", &serde_json::json!({}), progress(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result["order_id"], "o-1");
    }

    #[tokio::test]
    async fn transient_failure_is_classified_transient() {
        let handler = WriteHandler::new(Arc::new(FakeDriver), WriteKind::SendToRemote);
        let err = handler
            .execute("u1", &serde_json::json!({}), progress(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn download_handler_stores_rows() {
        let handler = DownloadHandler::new(Arc::new(FakeDriver), Arc::new(FakeStore), "orders");
        let result = handler
            .execute("u1", &serde_json::json!({}), progress(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result["rows"], 5);
    }

    #[tokio::test]
    async fn cancelled_before_submission_is_permanent() {
        let handler = WriteHandler::new(Arc::new(FakeDriver), WriteKind::SubmitOrder);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = handler
            .execute("u1", &serde_json::json!({}), progress(), cancel)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
