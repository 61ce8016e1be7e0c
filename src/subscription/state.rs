use crate::domain::ActiveOrder;
use crate::error::SubscriptionError;

/// Where a subscription is in its lifecycle.
///
/// ```text
/// Idle -> Subscribing -> Live <-> Error
///                         |
///                         +-> Faulted
/// ```
///
/// A query change moves any non-terminal phase back to `Idle` or
/// `Subscribing`. `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not enough input to query (no user, no prescription id).
    Idle,
    /// Query issued, first snapshot pending.
    Subscribing,
    Live,
    /// Transport failure. The transport stays open and the next snapshot
    /// returns the subscription to `Live`.
    Error,
    /// A snapshot held a malformed document. Transport closed until the
    /// query changes.
    Faulted,
    Disposed,
}

/// What consumers observe: derived value, loading flag, last error.
#[derive(Debug, Clone, PartialEq)]
pub struct Published<T> {
    pub value: T,
    pub loading: bool,
    pub error: Option<SubscriptionError>,
    pub phase: Phase,
}

impl<T> Published<T> {
    pub fn idle(empty: T) -> Self {
        Self {
            value: empty,
            loading: false,
            error: None,
            phase: Phase::Idle,
        }
    }

    pub fn subscribing(empty: T) -> Self {
        Self {
            value: empty,
            loading: true,
            error: None,
            phase: Phase::Subscribing,
        }
    }

    pub fn live(value: T) -> Self {
        Self {
            value,
            loading: false,
            error: None,
            phase: Phase::Live,
        }
    }

    pub fn failed(empty: T, error: SubscriptionError) -> Self {
        Self {
            value: empty,
            loading: false,
            error: Some(error),
            phase: Phase::Error,
        }
    }

    pub fn faulted(empty: T, error: SubscriptionError) -> Self {
        Self {
            value: empty,
            loading: false,
            error: Some(error),
            phase: Phase::Faulted,
        }
    }

    pub fn is_live(&self) -> bool {
        self.phase == Phase::Live
    }
}

impl Published<Option<ActiveOrder>> {
    /// True while the prescription has an order in a blocking status and
    /// must not take new quote activity.
    pub fn blocks_new_quotes(&self) -> bool {
        self.value.is_some()
    }
}
