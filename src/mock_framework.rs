//! # Mock Framework
//!
//! Utilities for testing subscriptions without a backend.
//!
//! Use [`create_mock_store`] to get a store and a receiver of listen
//! requests. Then use [`expect_listen`] to assert the query a subscription
//! issued and [`accept_listen`] or [`reject_listen`] to answer it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use crate::error::StoreError;
use crate::store::{BackendTimestamp, DocumentStore, Listener, Query, RawDocument, SnapshotSender};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// A listen call waiting for the test to answer it.
#[derive(Debug)]
pub struct ListenRequest {
    pub query: Query,
    pub respond_to: oneshot::Sender<Result<Listener, StoreError>>,
}

pub struct MockStore {
    sender: mpsc::Sender<ListenRequest>,
}

#[async_trait]
impl DocumentStore for MockStore {
    async fn listen(&self, query: Query) -> Result<Listener, StoreError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(ListenRequest { query, respond_to })
            .await
            .map_err(|_| StoreError::Closed)?;
        response.await.map_err(|_| StoreError::Closed)?
    }
}

/// Creates a mock store and a receiver for asserting listen requests.
///
/// Subscriptions block inside `listen` until the test answers, which makes
/// the `Subscribing` phase observable and every delivery deterministic.
pub fn create_mock_store(buffer_size: usize) -> (Arc<MockStore>, mpsc::Receiver<ListenRequest>) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    (Arc::new(MockStore { sender }), receiver)
}

/// Next listen request, or `None` if none arrives within a second.
pub async fn expect_listen(receiver: &mut mpsc::Receiver<ListenRequest>) -> Option<ListenRequest> {
    tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .ok()
        .flatten()
}

/// Asserts that no listen request is issued within a short grace period.
pub async fn assert_no_listen(receiver: &mut mpsc::Receiver<ListenRequest>) {
    let next = tokio::time::timeout(Duration::from_millis(50), receiver.recv()).await;
    assert!(next.is_err(), "unexpected listen request: {:?}", next);
}

/// Opens the transport and hands the test its sending side.
pub fn accept_listen(request: ListenRequest) -> SnapshotSender {
    let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::SeqCst);
    let (sender, listener) = Listener::channel(id, 16);
    request
        .respond_to
        .send(Ok(listener))
        .expect("subscription stopped waiting for listen");
    sender
}

pub fn reject_listen(request: ListenRequest, error: StoreError) {
    let _ = request.respond_to.send(Err(error));
}

/// Awaits `future` or fails the test after two seconds.
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}

pub fn order_doc(
    id: &str,
    user_id: &str,
    receta_id: &str,
    estado: &str,
    created_secs: i64,
) -> RawDocument {
    RawDocument::new(
        id,
        json!({
            "userId": user_id,
            "recetaId": receta_id,
            "cotizacionId": format!("c-{}", id),
            "farmaciaId": "f1",
            "precio": 1500,
            "estado": estado,
            "fechaCreacion": BackendTimestamp::new(created_secs, 0).to_value(),
        }),
    )
}

pub fn quote_doc(id: &str, estado: &str, created_secs: i64) -> RawDocument {
    RawDocument::new(
        id,
        json!({
            "farmaciaId": format!("f-{}", id),
            "nombreComercial": "Farmacia del Pueblo",
            "precio": 1200,
            "estado": estado,
            "fechaCreacion": BackendTimestamp::new(created_secs, 0).to_value(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CollectionPath, Snapshot};

    #[tokio::test]
    async fn test_mock_store() {
        let (store, mut receiver) = create_mock_store(10);

        let listen_task = tokio::spawn(async move {
            store.listen(Query::collection(CollectionPath::orders())).await
        });

        let request = expect_listen(&mut receiver).await.expect("Expected listen request");
        assert_eq!(request.query.collection, CollectionPath::orders());
        let sender = accept_listen(request);

        let mut listener = listen_task.await.unwrap().unwrap();
        sender.send(Ok(Snapshot::default())).await.unwrap();
        assert_eq!(listener.next().await, Some(Ok(Snapshot::default())));
    }
}
