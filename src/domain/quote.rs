use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a pharmacy quote.
///
/// Ordering follows the quote lifecycle, so `Quoted` always comes first.
/// Statuses the client does not know sort last, lexically among themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QuoteStatus {
    Quoted,
    Accepted,
    Rejected,
    Expired,
    Other(String),
}

impl QuoteStatus {
    pub fn as_str(&self) -> &str {
        match self {
            QuoteStatus::Quoted => "cotizada",
            QuoteStatus::Accepted => "aceptada",
            QuoteStatus::Rejected => "rechazada",
            QuoteStatus::Expired => "vencida",
            QuoteStatus::Other(raw) => raw,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            QuoteStatus::Quoted => 0,
            QuoteStatus::Accepted => 1,
            QuoteStatus::Rejected => 2,
            QuoteStatus::Expired => 3,
            QuoteStatus::Other(_) => 4,
        }
    }
}

impl Ord for QuoteStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.as_str().cmp(other.as_str()))
    }
}

impl PartialOrd for QuoteStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&str> for QuoteStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "cotizada" => QuoteStatus::Quoted,
            "aceptada" => QuoteStatus::Accepted,
            "rechazada" => QuoteStatus::Rejected,
            "vencida" => QuoteStatus::Expired,
            other => QuoteStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for QuoteStatus {
    fn from(raw: String) -> Self {
        QuoteStatus::from(raw.as_str())
    }
}

impl From<QuoteStatus> for String {
    fn from(status: QuoteStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pharmacy's priced offer for a prescription
/// (`recetas/{receta_id}/cotizaciones/{id}`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub id: String,
    pub receta_id: String,
    pub pharmacy_id: String,
    pub pharmacy_name: Option<String>,
    pub address: Option<String>,
    pub price: f64,
    pub status: QuoteStatus,
    pub created_at: DateTime<Utc>,
    pub image_url: Option<String>,
}
