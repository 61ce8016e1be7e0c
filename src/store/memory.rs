//! In-process backend used by tests and the demo binary.
//!
//! [`StoreActor`] owns every collection and every registered listener and
//! runs as a single task; [`InMemoryStore`] is the cloneable handle that
//! talks to it over a channel. Writes re-evaluate the listeners of the
//! touched collection and push a fresh snapshot to each one whose result
//! set changed, which is how the real backend behaves.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{CollectionPath, DocumentStore, Listener, Query, RawDocument, Snapshot, SnapshotSender};
use crate::error::StoreError;

pub type Response<T> = oneshot::Sender<Result<T, StoreError>>;

#[derive(Debug)]
pub enum StoreRequest {
    Listen {
        query: Query,
        respond_to: Response<Listener>,
    },
    Upsert {
        collection: CollectionPath,
        document: RawDocument,
        respond_to: Response<()>,
    },
    Remove {
        collection: CollectionPath,
        id: String,
        respond_to: Response<bool>,
    },
    Fail {
        collection: CollectionPath,
        error: StoreError,
        respond_to: Response<usize>,
    },
    ListenerCount {
        respond_to: Response<usize>,
    },
}

struct Registration {
    id: u64,
    query: Query,
    sender: SnapshotSender,
    last_delivered: Option<Vec<RawDocument>>,
}

pub struct StoreActor {
    receiver: mpsc::Receiver<StoreRequest>,
    collections: HashMap<CollectionPath, HashMap<String, RawDocument>>,
    listeners: Vec<Registration>,
    next_listener_id: u64,
    buffer_size: usize,
}

impl StoreActor {
    pub fn new(buffer_size: usize) -> (Self, InMemoryStore) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = Self {
            receiver,
            collections: HashMap::new(),
            listeners: Vec::new(),
            next_listener_id: 1,
            buffer_size,
        };
        (actor, InMemoryStore { sender })
    }

    /// Runs until every [`InMemoryStore`] handle is dropped. Registered
    /// listeners are closed on exit.
    #[instrument(name = "memory_store", skip(self))]
    pub async fn run(mut self) {
        info!("InMemoryStore starting");
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                StoreRequest::Listen { query, respond_to } => {
                    let result = self.handle_listen(query).await;
                    let _ = respond_to.send(result);
                }
                StoreRequest::Upsert {
                    collection,
                    document,
                    respond_to,
                } => {
                    debug!(collection = %collection, doc_id = %document.id, "Upserting document");
                    self.collections
                        .entry(collection.clone())
                        .or_default()
                        .insert(document.id.clone(), document);
                    self.notify(&collection).await;
                    let _ = respond_to.send(Ok(()));
                }
                StoreRequest::Remove {
                    collection,
                    id,
                    respond_to,
                } => {
                    let removed = self
                        .collections
                        .get_mut(&collection)
                        .and_then(|docs| docs.remove(&id))
                        .is_some();
                    debug!(collection = %collection, doc_id = %id, removed, "Removing document");
                    if removed {
                        self.notify(&collection).await;
                    }
                    let _ = respond_to.send(Ok(removed));
                }
                StoreRequest::Fail {
                    collection,
                    error,
                    respond_to,
                } => {
                    let reached = self.handle_fail(&collection, error).await;
                    let _ = respond_to.send(Ok(reached));
                }
                StoreRequest::ListenerCount { respond_to } => {
                    self.prune_closed();
                    let _ = respond_to.send(Ok(self.listeners.len()));
                }
            }
        }
        info!(listeners = self.listeners.len(), "InMemoryStore stopped");
    }

    #[instrument(fields(collection = %query.collection), skip(self, query))]
    async fn handle_listen(&mut self, query: Query) -> Result<Listener, StoreError> {
        let id = self.next_listener_id;
        self.next_listener_id += 1;

        let (sender, listener) = Listener::channel(id, self.buffer_size);
        let documents = self.evaluate(&query);
        debug!(listener_id = id, documents = documents.len(), "Listener registered");

        sender
            .send(Ok(Snapshot::new(documents.clone())))
            .await
            .map_err(|_| StoreError::Closed)?;

        self.listeners.push(Registration {
            id,
            query,
            sender,
            last_delivered: Some(documents),
        });
        Ok(listener)
    }

    async fn handle_fail(&mut self, collection: &CollectionPath, error: StoreError) -> usize {
        self.prune_closed();
        let mut reached = 0;
        for registration in self
            .listeners
            .iter_mut()
            .filter(|r| &r.query.collection == collection)
        {
            warn!(listener_id = registration.id, error = %error, "Delivering transport failure");
            if registration.sender.send(Err(error.clone())).await.is_ok() {
                reached += 1;
            }
            registration.last_delivered = None;
        }
        reached
    }

    /// Pushes a snapshot to every listener on `collection` whose result set changed.
    async fn notify(&mut self, collection: &CollectionPath) {
        self.prune_closed();
        let docs = self.collections.get(collection);
        for registration in self
            .listeners
            .iter_mut()
            .filter(|r| &r.query.collection == collection)
        {
            let documents = registration
                .query
                .evaluate(docs.into_iter().flat_map(|docs| docs.values()));
            if registration.last_delivered.as_ref() == Some(&documents) {
                continue;
            }
            debug!(listener_id = registration.id, documents = documents.len(), "Pushing snapshot");
            if registration
                .sender
                .send(Ok(Snapshot::new(documents.clone())))
                .await
                .is_ok()
            {
                registration.last_delivered = Some(documents);
            }
        }
        self.prune_closed();
    }

    fn evaluate(&self, query: &Query) -> Vec<RawDocument> {
        query.evaluate(
            self.collections
                .get(&query.collection)
                .into_iter()
                .flat_map(|docs| docs.values()),
        )
    }

    fn prune_closed(&mut self) {
        self.listeners.retain(|registration| {
            let open = !registration.sender.is_closed();
            if !open {
                debug!(listener_id = registration.id, "Listener closed by subscriber");
            }
            open
        });
    }
}

/// Handle to a running [`StoreActor`].
#[derive(Clone)]
pub struct InMemoryStore {
    sender: mpsc::Sender<StoreRequest>,
}

impl InMemoryStore {
    /// Spawns the store actor and returns a handle plus its task.
    pub fn start(buffer_size: usize) -> (Self, JoinHandle<()>) {
        let (actor, store) = StoreActor::new(buffer_size);
        let handle = tokio::spawn(actor.run());
        (store, handle)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Response<T>) -> StoreRequest,
    ) -> Result<T, StoreError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| StoreError::Closed)?;
        response.await.map_err(|_| StoreError::Closed)?
    }

    pub async fn upsert(
        &self,
        collection: CollectionPath,
        document: RawDocument,
    ) -> Result<(), StoreError> {
        self.request(|respond_to| StoreRequest::Upsert {
            collection,
            document,
            respond_to,
        })
        .await
    }

    pub async fn remove(
        &self,
        collection: CollectionPath,
        id: impl Into<String>,
    ) -> Result<bool, StoreError> {
        let id = id.into();
        self.request(|respond_to| StoreRequest::Remove {
            collection,
            id,
            respond_to,
        })
        .await
    }

    /// Delivers `error` to every listener on `collection`, as a dropped
    /// connection would. Returns how many listeners received it.
    pub async fn fail_listeners(
        &self,
        collection: CollectionPath,
        error: StoreError,
    ) -> Result<usize, StoreError> {
        self.request(|respond_to| StoreRequest::Fail {
            collection,
            error,
            respond_to,
        })
        .await
    }

    pub async fn listener_count(&self) -> Result<usize, StoreError> {
        self.request(|respond_to| StoreRequest::ListenerCount { respond_to })
            .await
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn listen(&self, query: Query) -> Result<Listener, StoreError> {
        self.request(|respond_to| StoreRequest::Listen { query, respond_to })
            .await
    }
}
