//! Raw backend documents to domain records.
//!
//! Every function here is pure. This is the only place that turns a
//! [`BackendTimestamp`] into a `DateTime<Utc>`.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::{ActiveOrder, Order, OrderStatus, Quote, QuoteStatus};
use crate::error::MappingError;
use crate::store::{BackendTimestamp, RawDocument, Snapshot};

/// Field names used by the `pedidos` and `cotizaciones` collections.
pub mod fields {
    pub const USER_ID: &str = "userId";
    pub const RECETA_ID: &str = "recetaId";
    pub const QUOTE_ID: &str = "cotizacionId";
    pub const PHARMACY_ID: &str = "farmaciaId";
    pub const PRICE: &str = "precio";
    pub const STATUS: &str = "estado";
    pub const CREATED_AT: &str = "fechaCreacion";
    pub const PAYMENT_DATE: &str = "fechaPago";
    pub const CLOSED_AT: &str = "fechaCierre";
    pub const PAYMENT_ID: &str = "paymentId";
    pub const PAYMENT_STATUS: &str = "paymentStatus";
    pub const PHARMACY_NAME: &str = "nombreComercial";
    pub const DELIVERY_ADDRESS: &str = "addressUser";
    pub const ADDRESS: &str = "direccion";
    pub const IMAGE_URL: &str = "imagenUrl";
}

/// Typed accessors over one document's field bag. `null` counts as absent.
struct FieldReader<'a> {
    doc: &'a RawDocument,
}

impl<'a> FieldReader<'a> {
    fn new(doc: &'a RawDocument) -> Self {
        Self { doc }
    }

    fn present(&self, field: &'static str) -> Option<&'a Value> {
        self.doc.get(field).filter(|value| !value.is_null())
    }

    fn missing(&self, field: &'static str) -> MappingError {
        MappingError::MissingField {
            doc_id: self.doc.id.clone(),
            field,
        }
    }

    fn invalid(&self, field: &'static str, reason: impl Into<String>) -> MappingError {
        MappingError::InvalidField {
            doc_id: self.doc.id.clone(),
            field,
            reason: reason.into(),
        }
    }

    fn opt_string(&self, field: &'static str) -> Result<Option<String>, MappingError> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.invalid(field, format!("expected string, got {}", other))),
        }
    }

    fn string(&self, field: &'static str) -> Result<String, MappingError> {
        self.opt_string(field)?.ok_or_else(|| self.missing(field))
    }

    fn number(&self, field: &'static str) -> Result<f64, MappingError> {
        match self.present(field) {
            None => Err(self.missing(field)),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| self.invalid(field, format!("expected number, got {}", value))),
        }
    }

    fn opt_timestamp(&self, field: &'static str) -> Result<Option<DateTime<Utc>>, MappingError> {
        let Some(value) = self.present(field) else {
            return Ok(None);
        };
        let timestamp = BackendTimestamp::from_value(value)
            .ok_or_else(|| self.invalid(field, format!("expected timestamp, got {}", value)))?;
        to_datetime(timestamp)
            .map(Some)
            .ok_or_else(|| self.invalid(field, "timestamp out of range"))
    }

    fn timestamp(&self, field: &'static str) -> Result<DateTime<Utc>, MappingError> {
        self.opt_timestamp(field)?.ok_or_else(|| self.missing(field))
    }
}

/// Converts the backend encoding into a UTC instant; `None` when out of range.
pub fn to_datetime(timestamp: BackendTimestamp) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(timestamp.seconds, timestamp.nanoseconds)
}

pub fn map_order(doc: &RawDocument) -> Result<Order, MappingError> {
    let f = FieldReader::new(doc);
    Ok(Order {
        id: doc.id.clone(),
        user_id: f.string(fields::USER_ID)?,
        receta_id: f.string(fields::RECETA_ID)?,
        quote_id: f.string(fields::QUOTE_ID)?,
        pharmacy_id: f.string(fields::PHARMACY_ID)?,
        price: f.number(fields::PRICE)?,
        status: OrderStatus::from(f.string(fields::STATUS)?),
        created_at: f.timestamp(fields::CREATED_AT)?,
        payment_date: f.opt_timestamp(fields::PAYMENT_DATE)?,
        closed_at: f.opt_timestamp(fields::CLOSED_AT)?,
        payment_id: f.opt_string(fields::PAYMENT_ID)?,
        payment_status: f.opt_string(fields::PAYMENT_STATUS)?,
        pharmacy_name: f.opt_string(fields::PHARMACY_NAME)?,
        delivery_address: f.opt_string(fields::DELIVERY_ADDRESS)?,
        image_url: f.opt_string(fields::IMAGE_URL)?,
    })
}

pub fn map_active_order(doc: &RawDocument) -> Result<ActiveOrder, MappingError> {
    map_order(doc).map(|order| ActiveOrder::from(&order))
}

/// Quotes are keyed by prescription and quote id, so the prescription id
/// comes from the collection path rather than the document.
pub fn map_quote(receta_id: &str, doc: &RawDocument) -> Result<Quote, MappingError> {
    let f = FieldReader::new(doc);
    Ok(Quote {
        id: doc.id.clone(),
        receta_id: receta_id.to_string(),
        pharmacy_id: f.string(fields::PHARMACY_ID)?,
        pharmacy_name: f.opt_string(fields::PHARMACY_NAME)?,
        address: f.opt_string(fields::ADDRESS)?,
        price: f.number(fields::PRICE)?,
        status: QuoteStatus::from(f.string(fields::STATUS)?),
        created_at: f.timestamp(fields::CREATED_AT)?,
        image_url: f.opt_string(fields::IMAGE_URL)?,
    })
}

/// Maps a whole snapshot, failing on the first malformed document.
pub fn map_orders(snapshot: &Snapshot) -> Result<Vec<Order>, MappingError> {
    snapshot.documents.iter().map(map_order).collect()
}

pub fn map_quotes(receta_id: &str, snapshot: &Snapshot) -> Result<Vec<Quote>, MappingError> {
    snapshot
        .documents
        .iter()
        .map(|doc| map_quote(receta_id, doc))
        .collect()
}
