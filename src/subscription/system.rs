use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::actor::{SubscriptionActor, SubscriptionClient};
use super::kind::{AllOrders, LatestBlockingOrder, PrescriptionQuotes, SubscriptionKind};
use crate::config::LiveConfig;
use crate::error::SubscriptionError;
use crate::session::Session;
use crate::store::DocumentStore;

pub type OrdersSubscription = SubscriptionClient<AllOrders>;
pub type ActiveOrderSubscription = SubscriptionClient<LatestBlockingOrder>;
pub type QuotesSubscription = SubscriptionClient<PrescriptionQuotes>;

/// Wires the store, session and configuration into subscription actors and
/// owns their shutdown.
///
/// Dropping the system without calling [`SubscriptionSystem::shutdown`]
/// also stops every subscription it started.
pub struct SubscriptionSystem {
    store: Arc<dyn DocumentStore>,
    session: Session,
    config: LiveConfig,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SubscriptionSystem {
    pub fn new(store: Arc<dyn DocumentStore>, session: Session, config: LiveConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        info!(
            blocking_statuses = config.blocking_statuses.len(),
            "Starting subscription system"
        );
        Self {
            store,
            session,
            config,
            shutdown,
            handles: Vec::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    fn spawn<K: SubscriptionKind>(&mut self, kind: K, params: K::Params) -> SubscriptionClient<K> {
        let (actor, client) = SubscriptionActor::new(
            kind,
            params,
            Arc::clone(&self.store),
            self.session.subscribe(),
            self.shutdown.subscribe(),
            self.config.channel_buffer,
        );
        self.handles.retain(|handle| !handle.is_finished());
        self.handles.push(tokio::spawn(actor.run()));
        client
    }

    /// Every order of the signed-in user, newest first.
    pub fn watch_orders(&mut self) -> OrdersSubscription {
        self.spawn(AllOrders, ())
    }

    /// The in-flight order blocking `receta_id`, if any.
    pub fn watch_active_order(&mut self, receta_id: Option<String>) -> ActiveOrderSubscription {
        let kind = LatestBlockingOrder::new(self.config.blocking_statuses.clone());
        self.spawn(kind, receta_id)
    }

    pub fn watch_quotes(&mut self, receta_id: Option<String>) -> QuotesSubscription {
        self.spawn(PrescriptionQuotes, receta_id)
    }

    /// Number of subscription actors still running.
    pub fn running_subscriptions(&self) -> usize {
        self.handles.iter().filter(|handle| !handle.is_finished()).count()
    }

    /// Disposes every subscription and waits for the actors to finish.
    pub async fn shutdown(self) -> Result<(), SubscriptionError> {
        info!("Shutting down subscription system...");
        self.shutdown.send_replace(true);

        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Subscription task failed: {:?}", e);
                return Err(SubscriptionError::ActorCommunicationError(format!(
                    "Subscription task failed: {:?}",
                    e
                )));
            }
        }

        info!("Subscription system shutdown complete.");
        Ok(())
    }
}
