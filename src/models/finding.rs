//! Finding model: one reported issue, owned by exactly one scan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::scanners::RawFinding;

/// Persisted finding row.
///
/// The `risk` label is the scanner's own vocabulary, stored verbatim —
/// severity is not normalized across backends.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Finding {
    pub id: Uuid,
    pub scan_id: Uuid,
    pub url: String,
    pub risk: String,
    pub name: String,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Validated finding ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFinding {
    pub scan_id: Uuid,
    pub url: String,
    pub risk: String,
    pub name: String,
    pub location: Option<String>,
}

impl NewFinding {
    /// Build from a raw vendor finding, rejecting items missing a mandatory
    /// field (affected URL or vulnerability/rule name).
    pub fn from_raw(scan_id: Uuid, raw: &RawFinding) -> Option<Self> {
        let url = raw.url.as_deref()?.trim();
        let name = raw.name.as_deref()?.trim();
        if url.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self {
            scan_id,
            url: url.to_string(),
            risk: raw
                .risk
                .as_deref()
                .unwrap_or("unspecified")
                .trim()
                .to_string(),
            name: name.to_string(),
            location: raw.location.clone(),
        })
    }
}
