//! The backend document store as seen from the client.
//!
//! The backend is an external collaborator: the realtime layer only issues
//! filtered, ordered, limited queries and receives pushed snapshots. This
//! module fixes the shapes crossing that boundary:
//!
//! - [`RawDocument`] - document id plus an untyped field bag
//! - [`BackendTimestamp`] - the backend-native point-in-time encoding
//! - [`Query`] - collection, `==`/`in` filters, one ordering, optional limit
//! - [`Listener`] - the receiving end of a live query
//! - [`DocumentStore`] - anything that can open a live query
//!
//! [`memory::InMemoryStore`] implements the trait for tests and the demo.

pub mod memory;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::StoreError;

/// Point in time as the backend encodes it inside a field bag:
/// `{"seconds": i64, "nanoseconds": u32}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BackendTimestamp {
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl BackendTimestamp {
    pub fn new(seconds: i64, nanoseconds: u32) -> Self {
        Self {
            seconds,
            nanoseconds,
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    pub fn to_value(self) -> Value {
        serde_json::json!({ "seconds": self.seconds, "nanoseconds": self.nanoseconds })
    }
}

/// A document exactly as the backend delivers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl RawDocument {
    /// Builds a document from a JSON object. Anything other than an object
    /// yields an empty field bag.
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Slash-separated path of a collection, e.g. `recetas/r1/cotizaciones`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The flat `pedidos` collection.
    pub fn orders() -> Self {
        Self::new("pedidos")
    }

    /// Quotes nested under one prescription.
    pub fn quotes(receta_id: &str) -> Self {
        Self(format!("recetas/{}/cotizaciones", receta_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
}

impl Filter {
    pub fn matches(&self, doc: &RawDocument) -> bool {
        match self {
            Filter::Eq { field, value } => doc.get(field) == Some(value),
            Filter::In { field, values } => doc.get(field).is_some_and(|v| values.contains(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A live query. Two queries are the same subscription target iff they are equal.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionPath,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn where_in(mut self, field: &str, values: Vec<Value>) -> Self {
        self.filters.push(Filter::In {
            field: field.to_string(),
            values,
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &RawDocument) -> bool {
        self.filters.iter().all(|filter| filter.matches(doc))
    }

    /// Runs the query over a collection's documents with backend semantics:
    /// documents lacking the ordering field are excluded, ties break on the
    /// document id, and the limit applies after ordering.
    pub fn evaluate<'a>(
        &self,
        docs: impl IntoIterator<Item = &'a RawDocument>,
    ) -> Vec<RawDocument> {
        let mut matched: Vec<&RawDocument> = docs
            .into_iter()
            .filter(|doc| self.matches(doc))
            .filter(|doc| match &self.order_by {
                Some(order) => doc.get(&order.field).is_some(),
                None => true,
            })
            .collect();

        matched.sort_by(|a, b| {
            let by_field = match &self.order_by {
                Some(order) => match (a.get(&order.field), b.get(&order.field)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    _ => Ordering::Equal,
                },
                None => Ordering::Equal,
            };
            let ordering = by_field.then_with(|| a.id.cmp(&b.id));
            match self.order_by.as_ref().map(|order| order.direction) {
                Some(Direction::Desc) => ordering.reverse(),
                _ => ordering,
            }
        });

        let limit = self.limit.unwrap_or(matched.len());
        matched.into_iter().take(limit).cloned().collect()
    }
}

/// Total order over field values: null, booleans, numbers, timestamps,
/// strings, arrays, then maps.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::Object(_) if BackendTimestamp::from_value(value).is_some() => 3,
            Value::String(_) => 4,
            Value::Array(_) => 5,
            Value::Object(_) => 6,
        }
    }

    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => {}
        unequal => return unequal,
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(x, y)| compare_values(x, y))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(_), Value::Object(_)) => {
            match (BackendTimestamp::from_value(a), BackendTimestamp::from_value(b)) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => Ordering::Equal,
            }
        }
        _ => Ordering::Equal,
    }
}

/// The full result set of a query at one moment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub documents: Vec<RawDocument>,
}

impl Snapshot {
    pub fn new(documents: Vec<RawDocument>) -> Self {
        Self { documents }
    }
}

pub type SnapshotResult = Result<Snapshot, StoreError>;
pub type SnapshotSender = mpsc::Sender<SnapshotResult>;

/// Receiving end of a live query.
///
/// Dropping a listener closes its channel, which cancels the transport: the
/// store sees the channel closed and nothing is delivered afterwards.
#[derive(Debug)]
pub struct Listener {
    id: u64,
    receiver: mpsc::Receiver<SnapshotResult>,
}

impl Listener {
    pub fn channel(id: u64, buffer_size: usize) -> (SnapshotSender, Self) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        (sender, Self { id, receiver })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// `None` once the store side has gone away.
    pub async fn next(&mut self) -> Option<SnapshotResult> {
        self.receiver.recv().await
    }
}

/// Opens live queries against the backend.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn listen(&self, query: Query) -> Result<Listener, StoreError>;
}
