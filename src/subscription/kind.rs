//! The three live queries the client keeps open.
//!
//! A [`SubscriptionKind`] says which query to run for a given user and
//! parameter set, and how to derive the published value from a snapshot.
//! The actor in [`super::actor`] does everything else.

use std::fmt::Debug;

use crate::config::BlockingStatuses;
use crate::domain::{ActiveOrder, Order, Quote};
use crate::error::MappingError;
use crate::mapper::{self, fields};
use crate::store::{CollectionPath, Direction, Query, Snapshot};

pub trait SubscriptionKind: Send + Sync + 'static {
    type Params: Clone + Debug + PartialEq + Send + Sync + 'static;
    type Value: Clone + Debug + PartialEq + Send + Sync + 'static;

    /// Used in logs.
    const NAME: &'static str;

    /// The value published while idle, subscribing, or after an error.
    fn empty(&self) -> Self::Value;

    /// `None` means the subscription must not open.
    fn query(&self, user_id: Option<&str>, params: &Self::Params) -> Option<Query>;

    /// Derives the published value from one snapshot alone.
    fn derive(
        &self,
        params: &Self::Params,
        snapshot: &Snapshot,
    ) -> Result<Self::Value, MappingError>;
}

/// Every order of the signed-in user, newest first.
#[derive(Debug, Clone, Default)]
pub struct AllOrders;

impl SubscriptionKind for AllOrders {
    type Params = ();
    type Value = Vec<Order>;

    const NAME: &'static str = "all_orders";

    fn empty(&self) -> Vec<Order> {
        Vec::new()
    }

    fn query(&self, user_id: Option<&str>, _params: &()) -> Option<Query> {
        let user_id = user_id?;
        Some(
            Query::collection(CollectionPath::orders())
                .where_eq(fields::USER_ID, user_id)
                .order_by(fields::CREATED_AT, Direction::Desc),
        )
    }

    fn derive(&self, _params: &(), snapshot: &Snapshot) -> Result<Vec<Order>, MappingError> {
        mapper::map_orders(snapshot)
    }
}

/// Newest order of the user for one prescription whose status is blocking.
#[derive(Debug, Clone)]
pub struct LatestBlockingOrder {
    blocking: BlockingStatuses,
}

impl LatestBlockingOrder {
    pub fn new(blocking: BlockingStatuses) -> Self {
        Self { blocking }
    }
}

impl SubscriptionKind for LatestBlockingOrder {
    /// Prescription id.
    type Params = Option<String>;
    type Value = Option<ActiveOrder>;

    const NAME: &'static str = "latest_blocking_order";

    fn empty(&self) -> Option<ActiveOrder> {
        None
    }

    fn query(&self, user_id: Option<&str>, receta_id: &Option<String>) -> Option<Query> {
        let user_id = user_id?;
        let receta_id = receta_id.as_deref()?;
        // The backend rejects an empty `in` list.
        if self.blocking.is_empty() {
            return None;
        }
        Some(
            Query::collection(CollectionPath::orders())
                .where_eq(fields::USER_ID, user_id)
                .where_eq(fields::RECETA_ID, receta_id)
                .where_in(fields::STATUS, self.blocking.to_values())
                .order_by(fields::CREATED_AT, Direction::Desc)
                .limit(1),
        )
    }

    fn derive(
        &self,
        _params: &Option<String>,
        snapshot: &Snapshot,
    ) -> Result<Option<ActiveOrder>, MappingError> {
        for doc in &snapshot.documents {
            let order = mapper::map_order(doc)?;
            if self.blocking.contains(&order.status) {
                return Ok(Some(ActiveOrder::from(&order)));
            }
        }
        Ok(None)
    }
}

/// Quotes of one prescription, quoted ones first.
#[derive(Debug, Clone, Default)]
pub struct PrescriptionQuotes;

impl SubscriptionKind for PrescriptionQuotes {
    /// Prescription id.
    type Params = Option<String>;
    type Value = Vec<Quote>;

    const NAME: &'static str = "prescription_quotes";

    fn empty(&self) -> Vec<Quote> {
        Vec::new()
    }

    fn query(&self, _user_id: Option<&str>, receta_id: &Option<String>) -> Option<Query> {
        let receta_id = receta_id.as_deref()?;
        Some(
            Query::collection(CollectionPath::quotes(receta_id))
                .order_by(fields::STATUS, Direction::Asc),
        )
    }

    fn derive(
        &self,
        receta_id: &Option<String>,
        snapshot: &Snapshot,
    ) -> Result<Vec<Quote>, MappingError> {
        let Some(receta_id) = receta_id.as_deref() else {
            return Ok(Vec::new());
        };
        let mut quotes = mapper::map_quotes(receta_id, snapshot)?;
        // Backend collation on `estado` is lexical; the lifecycle order is not.
        quotes.sort_by(|a, b| a.status.cmp(&b.status));
        Ok(quotes)
    }
}
