use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, instrument, warn};

use super::kind::SubscriptionKind;
use super::state::{Phase, Published};
use crate::error::{StoreError, SubscriptionError};
use crate::session::UserId;
use crate::store::{DocumentStore, Listener, Query, SnapshotResult};

/// A listen call that has been issued but not yet answered by the store.
type PendingListen = Pin<Box<dyn Future<Output = Result<Listener, StoreError>> + Send>>;

#[derive(Debug)]
pub enum SubscriptionRequest<K: SubscriptionKind> {
    /// Replaces the parameters. Acknowledged once the previous transport
    /// is closed.
    SetParams {
        params: K::Params,
        respond_to: oneshot::Sender<()>,
    },
    Dispose {
        respond_to: oneshot::Sender<()>,
    },
}

/// Owns one live query and the value published from it.
///
/// The actor holds at most one transport at a time, either a pending listen
/// call or an open [`Listener`]. Any change of the derived query drops it
/// before the next one is requested, so a replaced transport can never write
/// into the published state. A pending listen is polled from the same loop
/// as the mailbox, so disposal never waits on the store.
pub struct SubscriptionActor<K: SubscriptionKind> {
    kind: K,
    params: K::Params,
    receiver: mpsc::Receiver<SubscriptionRequest<K>>,
    store: Arc<dyn DocumentStore>,
    session: watch::Receiver<Option<UserId>>,
    session_open: bool,
    shutdown: watch::Receiver<bool>,
    published: watch::Sender<Published<K::Value>>,
    query: Option<Query>,
    /// Set when the store rejected the last listen; the same query may reopen.
    open_failed: bool,
    pending: Option<PendingListen>,
    listener: Option<Listener>,
}

impl<K: SubscriptionKind> SubscriptionActor<K> {
    /// Evaluates the initial query right away: without enough input the
    /// client starts out `Idle` and no query is ever sent.
    pub fn new(
        kind: K,
        params: K::Params,
        store: Arc<dyn DocumentStore>,
        mut session: watch::Receiver<Option<UserId>>,
        shutdown: watch::Receiver<bool>,
        buffer_size: usize,
    ) -> (Self, SubscriptionClient<K>) {
        let user_id = session.borrow_and_update().clone();
        let query = kind.query(user_id.as_deref(), &params);
        let initial = match query {
            Some(_) => Published::subscribing(kind.empty()),
            None => Published::idle(kind.empty()),
        };

        let (published, state) = watch::channel(initial);
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = Self {
            kind,
            params,
            receiver,
            store,
            session,
            session_open: true,
            shutdown,
            published,
            query,
            open_failed: false,
            pending: None,
            listener: None,
        };
        (actor, SubscriptionClient { sender, state })
    }

    /// Runs until disposed, shut down, or every client is dropped.
    #[instrument(name = "subscription", fields(kind = K::NAME), skip(self))]
    pub async fn run(mut self) {
        info!(params = ?self.params, "Subscription starting");

        if let Some(query) = self.query.clone() {
            self.open(query);
        }

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    debug!("Shutdown signalled");
                    break;
                }
                request = self.receiver.recv() => match request {
                    Some(SubscriptionRequest::SetParams { params, respond_to }) => {
                        self.handle_set_params(params, respond_to);
                    }
                    Some(SubscriptionRequest::Dispose { respond_to }) => {
                        self.dispose();
                        let _ = respond_to.send(());
                        return;
                    }
                    None => {
                        debug!("All clients dropped");
                        break;
                    }
                },
                changed = self.session.changed(), if self.session_open => {
                    if changed.is_err() {
                        // Provider gone; keep the last known user.
                        self.session_open = false;
                        continue;
                    }
                    if let Some(query) = self.retarget() {
                        self.open(query);
                    }
                }
                opened = next_opened(&mut self.pending) => {
                    self.pending = None;
                    self.handle_opened(opened);
                }
                delivery = next_delivery(&mut self.listener) => {
                    self.handle_delivery(delivery);
                }
            }
        }

        self.dispose();
    }

    #[instrument(skip(self, respond_to))]
    fn handle_set_params(&mut self, params: K::Params, respond_to: oneshot::Sender<()>) {
        debug!("Processing set_params request");
        self.params = params;
        if let Some(query) = self.retarget() {
            self.open(query);
        }
        let _ = respond_to.send(());
    }

    /// Recomputes the query. When it changed, closes the current transport,
    /// publishes the matching phase, and returns the query to open.
    fn retarget(&mut self) -> Option<Query> {
        let user_id = self.session.borrow_and_update().clone();
        let query = self.kind.query(user_id.as_deref(), &self.params);
        if query == self.query && !self.open_failed {
            debug!("Query unchanged");
            return None;
        }
        self.open_failed = false;

        self.close_transport();
        self.query = query.clone();

        match query {
            Some(query) => {
                self.publish(Published::subscribing(self.kind.empty()));
                Some(query)
            }
            None => {
                info!("Not enough input to query, going idle");
                self.publish(Published::idle(self.kind.empty()));
                None
            }
        }
    }

    fn open(&mut self, query: Query) {
        debug!(collection = %query.collection, "Opening transport");
        let store = Arc::clone(&self.store);
        self.pending = Some(Box::pin(async move { store.listen(query).await }));
    }

    fn handle_opened(&mut self, opened: Result<Listener, StoreError>) {
        match opened {
            Ok(listener) => {
                debug!(listener_id = listener.id(), "Transport open");
                self.listener = Some(listener);
            }
            Err(e) => {
                warn!(error = %e, "Failed to open transport");
                self.open_failed = true;
                self.publish(Published::failed(self.kind.empty(), e.into()));
            }
        }
    }

    /// Cancels a pending listen and drops the open listener, if any.
    fn close_transport(&mut self) {
        if self.pending.take().is_some() {
            debug!("Cancelling pending listen");
        }
        if let Some(listener) = self.listener.take() {
            debug!(listener_id = listener.id(), "Closing transport");
        }
    }

    fn handle_delivery(&mut self, delivery: Option<SnapshotResult>) {
        match delivery {
            Some(Ok(snapshot)) => match self.kind.derive(&self.params, &snapshot) {
                Ok(value) => {
                    debug!(documents = snapshot.documents.len(), "Snapshot applied");
                    self.publish(Published::live(value));
                }
                Err(e) => {
                    error!(error = %e, "Malformed document in snapshot, subscription faulted");
                    self.listener = None;
                    self.publish(Published::faulted(self.kind.empty(), e.into()));
                }
            },
            Some(Err(e)) => {
                warn!(error = %e, "Transport failure");
                self.publish(Published::failed(self.kind.empty(), e.into()));
            }
            None => {
                warn!("Transport closed by store");
                self.listener = None;
                self.publish(Published::failed(self.kind.empty(), StoreError::Closed.into()));
            }
        }
    }

    fn dispose(&mut self) {
        self.close_transport();
        self.query = None;
        self.published.send_modify(|state| {
            state.loading = false;
            state.phase = Phase::Disposed;
        });
        info!("Subscription disposed");
    }

    fn publish(&self, state: Published<K::Value>) {
        self.published.send_replace(state);
    }
}

async fn next_opened(pending: &mut Option<PendingListen>) -> Result<Listener, StoreError> {
    match pending {
        Some(pending) => pending.await,
        None => std::future::pending().await,
    }
}

async fn next_delivery(listener: &mut Option<Listener>) -> Option<SnapshotResult> {
    match listener {
        Some(listener) => listener.next().await,
        None => std::future::pending().await,
    }
}

/// Consumer handle to a subscription.
pub struct SubscriptionClient<K: SubscriptionKind> {
    sender: mpsc::Sender<SubscriptionRequest<K>>,
    state: watch::Receiver<Published<K::Value>>,
}

impl<K: SubscriptionKind> Clone for SubscriptionClient<K> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            state: self.state.clone(),
        }
    }
}

impl<K: SubscriptionKind> SubscriptionClient<K> {
    pub fn current(&self) -> Published<K::Value> {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state transition.
    pub fn watch(&self) -> watch::Receiver<Published<K::Value>> {
        self.state.clone()
    }

    #[instrument(skip(self), fields(kind = K::NAME))]
    pub async fn set_params(&self, params: K::Params) -> Result<(), SubscriptionError> {
        debug!("Sending request");
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SubscriptionRequest::SetParams { params, respond_to })
            .await
            .map_err(|_| SubscriptionError::ActorCommunicationError("Actor closed".to_string()))?;
        response
            .await
            .map_err(|_| SubscriptionError::ActorCommunicationError("Actor dropped".to_string()))
    }

    /// Closes the transport and stops the actor. Disposing twice is fine.
    #[instrument(skip(self), fields(kind = K::NAME))]
    pub async fn dispose(&self) -> Result<(), SubscriptionError> {
        debug!("Sending request");
        let (respond_to, response) = oneshot::channel();
        if self
            .sender
            .send(SubscriptionRequest::Dispose { respond_to })
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = response.await;
        Ok(())
    }

    /// Waits until the published state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&Published<K::Value>) -> bool,
    ) -> Result<Published<K::Value>, SubscriptionError> {
        let mut state = self.state.clone();
        let matched = state
            .wait_for(predicate)
            .await
            .map_err(|_| {
                SubscriptionError::ActorCommunicationError("Subscription closed".to_string())
            })?;
        Ok(matched.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlockingStatuses;
    use crate::domain::OrderStatus;
    use crate::error::MappingError;
    use crate::mock_framework::{
        accept_listen, assert_no_listen, create_mock_store, expect_listen, order_doc, reject_listen,
        within, ListenRequest,
    };
    use crate::session::Session;
    use crate::store::{RawDocument, Snapshot};
    use crate::subscription::{AllOrders, LatestBlockingOrder};
    use serde_json::json;

    fn start<K: SubscriptionKind>(
        kind: K,
        params: K::Params,
        store: Arc<dyn DocumentStore>,
        session: &Session,
    ) -> (SubscriptionClient<K>, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (actor, client) =
            SubscriptionActor::new(kind, params, store, session.subscribe(), shutdown_rx, 8);
        tokio::spawn(actor.run());
        (client, shutdown_tx)
    }

    fn filters_receta(request: &ListenRequest, receta_id: &str) -> bool {
        request.query.filters.iter().any(|filter| match filter {
            crate::store::Filter::Eq { field, value } => {
                field == "recetaId" && value == &json!(receta_id)
            }
            _ => false,
        })
    }

    fn blocking() -> LatestBlockingOrder {
        LatestBlockingOrder::new(BlockingStatuses::new([OrderStatus::Pending, OrderStatus::Paid]))
    }

    #[tokio::test]
    async fn test_unauthenticated_all_orders_is_idle_without_query() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::new();
        let (client, _shutdown) = start(AllOrders, (), store, &session);

        let state = client.current();
        assert_eq!(state.phase, Phase::Idle);
        assert!(!state.loading);
        assert!(state.value.is_empty());
        assert_eq!(state.error, None);

        assert_no_listen(&mut requests).await;
    }

    #[tokio::test]
    async fn test_each_snapshot_replaces_the_previous_value() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, _shutdown) = start(AllOrders, (), store, &session);

        assert!(client.current().loading);
        assert_eq!(client.current().phase, Phase::Subscribing);

        let request = within(expect_listen(&mut requests)).await.unwrap();
        assert_eq!(request.query.filters.len(), 1);
        let transport = accept_listen(request);

        transport
            .send(Ok(Snapshot::new(vec![
                order_doc("p2", "u1", "r1", "pagado", 20),
                order_doc("p1", "u1", "r1", "entregado", 10),
            ])))
            .await
            .unwrap();
        let first = within(client.wait_for(|s| s.is_live())).await.unwrap();
        assert_eq!(first.value.len(), 2);
        assert!(!first.loading);

        transport
            .send(Ok(Snapshot::new(vec![order_doc("p3", "u1", "r2", "pendiente", 30)])))
            .await
            .unwrap();
        let second = within(client.wait_for(|s| s.value.len() == 1)).await.unwrap();
        let ids: Vec<_> = second.value.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["p3"]);
    }

    #[tokio::test]
    async fn test_transport_error_is_advisory() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, _shutdown) = start(AllOrders, (), store, &session);
        let transport = accept_listen(within(expect_listen(&mut requests)).await.unwrap());

        transport
            .send(Ok(Snapshot::new(vec![order_doc("p1", "u1", "r1", "pagado", 10)])))
            .await
            .unwrap();
        within(client.wait_for(|s| s.is_live())).await.unwrap();

        transport
            .send(Err(StoreError::Transport("connection reset".into())))
            .await
            .unwrap();
        let failed = within(client.wait_for(|s| s.phase == Phase::Error)).await.unwrap();
        assert!(failed.value.is_empty());
        assert!(!failed.loading);
        assert_eq!(
            failed.error,
            Some(SubscriptionError::Transport(StoreError::Transport("connection reset".into())))
        );
        assert!(!transport.is_closed());

        transport
            .send(Ok(Snapshot::new(vec![order_doc("p1", "u1", "r1", "pagado", 10)])))
            .await
            .unwrap();
        let recovered = within(client.wait_for(|s| s.is_live())).await.unwrap();
        assert_eq!(recovered.value.len(), 1);
        assert_eq!(recovered.error, None);
    }

    #[tokio::test]
    async fn test_retargeted_transport_cannot_deliver() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, _shutdown) = start(blocking(), Some("r1".to_string()), store, &session);

        let first = within(expect_listen(&mut requests)).await.unwrap();
        let old_transport = accept_listen(first);
        old_transport
            .send(Ok(Snapshot::new(vec![order_doc("p1", "u1", "r1", "pagado", 10)])))
            .await
            .unwrap();
        let live = within(client.wait_for(|s| s.is_live())).await.unwrap();
        assert_eq!(live.value.map(|o| o.id), Some("p1".to_string()));

        client.set_params(Some("r2".to_string())).await.unwrap();
        assert!(old_transport.is_closed());
        let late = old_transport
            .send(Ok(Snapshot::new(vec![order_doc("p9", "u1", "r1", "pagado", 99)])))
            .await;
        assert!(late.is_err());

        let state = client.current();
        assert_eq!(state.phase, Phase::Subscribing);
        assert_eq!(state.value, None);

        let second = within(expect_listen(&mut requests)).await.unwrap();
        assert!(filters_receta(&second, "r2"));
        let transport = accept_listen(second);
        transport.send(Ok(Snapshot::default())).await.unwrap();
        let state = within(client.wait_for(|s| s.is_live())).await.unwrap();
        assert!(!state.blocks_new_quotes());
    }

    #[tokio::test]
    async fn test_same_params_do_not_reopen() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, _shutdown) = start(blocking(), Some("r1".to_string()), store, &session);
        let transport = accept_listen(within(expect_listen(&mut requests)).await.unwrap());

        client.set_params(Some("r1".to_string())).await.unwrap();
        assert!(!transport.is_closed());
        assert_no_listen(&mut requests).await;
    }

    #[tokio::test]
    async fn test_clearing_prescription_goes_idle() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, _shutdown) = start(blocking(), Some("r1".to_string()), store, &session);
        let transport = accept_listen(within(expect_listen(&mut requests)).await.unwrap());

        client.set_params(None).await.unwrap();
        assert!(transport.is_closed());
        let state = client.current();
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.value, None);
        assert!(!state.loading);
        assert_no_listen(&mut requests).await;
    }

    #[tokio::test]
    async fn test_malformed_document_faults_subscription() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, _shutdown) = start(AllOrders, (), store, &session);
        let transport = accept_listen(within(expect_listen(&mut requests)).await.unwrap());

        let broken = RawDocument::new("p1", json!({ "userId": "u1", "recetaId": "r1" }));
        transport.send(Ok(Snapshot::new(vec![broken]))).await.unwrap();

        let state = within(client.wait_for(|s| s.phase == Phase::Faulted)).await.unwrap();
        assert!(state.value.is_empty());
        assert!(matches!(
            state.error,
            Some(SubscriptionError::Mapping(MappingError::MissingField { .. }))
        ));
        within(async {
            while !transport.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await;
    }

    #[tokio::test]
    async fn test_rejected_listen_publishes_error() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, _shutdown) = start(AllOrders, (), store, &session);

        let request = within(expect_listen(&mut requests)).await.unwrap();
        reject_listen(request, StoreError::PermissionDenied("pedidos".into()));

        let state = within(client.wait_for(|s| s.phase == Phase::Error)).await.unwrap();
        assert!(!state.loading);
        assert_eq!(
            state.error,
            Some(SubscriptionError::Transport(StoreError::PermissionDenied("pedidos".into())))
        );
    }

    #[tokio::test]
    async fn test_session_change_retargets_orders() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, _shutdown) = start(AllOrders, (), store, &session);
        let transport = accept_listen(within(expect_listen(&mut requests)).await.unwrap());
        transport
            .send(Ok(Snapshot::new(vec![order_doc("p1", "u1", "r1", "pagado", 10)])))
            .await
            .unwrap();
        within(client.wait_for(|s| s.is_live())).await.unwrap();

        session.sign_out();
        let idle = within(client.wait_for(|s| s.phase == Phase::Idle)).await.unwrap();
        assert!(idle.value.is_empty());
        assert!(transport.is_closed());

        session.sign_in("u2");
        let request = within(expect_listen(&mut requests)).await.unwrap();
        assert_eq!(
            request.query.filters,
            vec![crate::store::Filter::Eq {
                field: "userId".into(),
                value: json!("u2"),
            }]
        );
    }

    #[tokio::test]
    async fn test_dispose_closes_transport_and_is_terminal() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, _shutdown) = start(AllOrders, (), store, &session);
        let transport = accept_listen(within(expect_listen(&mut requests)).await.unwrap());
        transport
            .send(Ok(Snapshot::new(vec![order_doc("p1", "u1", "r1", "pagado", 10)])))
            .await
            .unwrap();
        within(client.wait_for(|s| s.is_live())).await.unwrap();

        client.dispose().await.unwrap();
        assert!(transport.is_closed());
        let state = client.current();
        assert_eq!(state.phase, Phase::Disposed);
        assert!(!state.loading);

        assert!(client.dispose().await.is_ok());
        assert!(client.set_params(()).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_signal_disposes() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, shutdown) = start(AllOrders, (), store, &session);
        let transport = accept_listen(within(expect_listen(&mut requests)).await.unwrap());

        shutdown.send_replace(true);
        within(client.wait_for(|s| s.phase == Phase::Disposed)).await.unwrap();
        assert!(transport.is_closed());
    }

    async fn wait_until_abandoned(request: &ListenRequest) {
        within(async {
            while !request.respond_to.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await;
    }

    #[tokio::test]
    async fn test_dispose_while_listen_pending() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, _shutdown) = start(AllOrders, (), store, &session);

        // Never answered.
        let request = within(expect_listen(&mut requests)).await.unwrap();

        within(client.dispose()).await.unwrap();
        let state = client.current();
        assert_eq!(state.phase, Phase::Disposed);
        assert!(!state.loading);
        wait_until_abandoned(&request).await;
    }

    #[tokio::test]
    async fn test_shutdown_while_listen_pending() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, shutdown) = start(AllOrders, (), store, &session);
        let request = within(expect_listen(&mut requests)).await.unwrap();

        shutdown.send_replace(true);
        within(client.wait_for(|s| s.phase == Phase::Disposed)).await.unwrap();
        wait_until_abandoned(&request).await;
    }

    #[tokio::test]
    async fn test_set_params_while_listen_pending_cancels_stale_listen() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, _shutdown) = start(blocking(), Some("r1".to_string()), store, &session);
        let stale = within(expect_listen(&mut requests)).await.unwrap();

        within(client.set_params(Some("r2".to_string()))).await.unwrap();
        assert!(stale.respond_to.is_closed());
        assert_eq!(client.current().phase, Phase::Subscribing);

        let (late_sender, late_listener) = Listener::channel(99, 1);
        assert!(stale.respond_to.send(Ok(late_listener)).is_err());
        assert!(late_sender.is_closed());

        let second = within(expect_listen(&mut requests)).await.unwrap();
        assert!(filters_receta(&second, "r2"));
        let transport = accept_listen(second);
        transport
            .send(Ok(Snapshot::new(vec![order_doc("p2", "u1", "r2", "pendiente", 20)])))
            .await
            .unwrap();
        let state = within(client.wait_for(|s| s.is_live())).await.unwrap();
        assert_eq!(state.value.map(|o| o.id), Some("p2".to_string()));
    }

    #[tokio::test]
    async fn test_same_params_retry_after_rejected_listen() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, _shutdown) = start(AllOrders, (), store, &session);

        let request = within(expect_listen(&mut requests)).await.unwrap();
        reject_listen(request, StoreError::Transport("offline".into()));
        within(client.wait_for(|s| s.phase == Phase::Error)).await.unwrap();

        client.set_params(()).await.unwrap();
        assert_eq!(client.current().phase, Phase::Subscribing);
        let retry = within(expect_listen(&mut requests)).await.unwrap();
        let transport = accept_listen(retry);
        transport.send(Ok(Snapshot::default())).await.unwrap();
        let state = within(client.wait_for(|s| s.is_live())).await.unwrap();
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn test_sign_out_after_rejected_listen_goes_idle() {
        let (store, mut requests) = create_mock_store(4);
        let session = Session::signed_in("u1");
        let (client, _shutdown) = start(AllOrders, (), store, &session);

        let request = within(expect_listen(&mut requests)).await.unwrap();
        reject_listen(request, StoreError::PermissionDenied("pedidos".into()));
        within(client.wait_for(|s| s.phase == Phase::Error)).await.unwrap();

        session.sign_out();
        let state = within(client.wait_for(|s| s.phase == Phase::Idle)).await.unwrap();
        assert_eq!(state.error, None);
        assert_no_listen(&mut requests).await;
    }
}
