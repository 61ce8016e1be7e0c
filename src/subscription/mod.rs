//! Live subscriptions that project backend documents into published state.
//!
//! - [`SubscriptionKind`] - which query to run and how to derive a value
//! - [`SubscriptionActor`] / [`SubscriptionClient`] - one task per live query
//!   and its consumer handle
//! - [`Published`] / [`Phase`] - what consumers observe
//! - [`SubscriptionSystem`] - wiring and shutdown

pub mod actor;
pub mod kind;
pub mod state;
pub mod system;

pub use actor::*;
pub use kind::*;
pub use state::*;
pub use system::*;
