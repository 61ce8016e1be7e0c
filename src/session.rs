//! The authenticated-user capability handed to every subscription.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

pub type UserId = String;

/// Current signed-in user, or none.
///
/// Cloning shares the same session. Subscriptions hold a receiver from
/// [`Session::subscribe`] and re-evaluate their query whenever the user
/// changes.
#[derive(Clone, Debug)]
pub struct Session {
    sender: Arc<watch::Sender<Option<UserId>>>,
}

impl Session {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn signed_in(user_id: impl Into<UserId>) -> Self {
        let session = Self::new();
        session.sign_in(user_id);
        session
    }

    pub fn sign_in(&self, user_id: impl Into<UserId>) {
        let user_id = user_id.into();
        let changed = self.sender.send_if_modified(|current| {
            if current.as_deref() == Some(user_id.as_str()) {
                false
            } else {
                *current = Some(user_id.clone());
                true
            }
        });
        if changed {
            info!(user_id = %user_id, "Session started");
        }
    }

    pub fn sign_out(&self) {
        if self.sender.send_if_modified(|current| current.take().is_some()) {
            info!("Session ended");
        }
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.sender.subscribe()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
