//! Core domain model for Flatwatch: offers and per-cycle summaries.

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "flatwatch-core";

/// One rental listing as extracted by a source adapter.
///
/// Identity is the listing `url` alone: equality and hashing ignore `title`,
/// so a `HashSet<Offer>` collapses the same listing reported by two sources
/// (or the same source queried twice) into a single entity. Which title
/// survives the collapse is arbitrary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub title: String,
    pub url: String,
}

impl Offer {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

impl PartialEq for Offer {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Offer {}

impl Hash for Offer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

/// A persisted offer row. `scraped_at` is assigned when the row is written,
/// not when the listing was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOffer {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub scraped_at: DateTime<Utc>,
}

/// Outcome of one fetch→dedupe→persist→notify cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub new_offers: usize,
}
