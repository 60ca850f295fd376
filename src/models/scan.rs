//! Scan model: one run of one scanner backend against one target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// -- Enums matching PostgreSQL --

/// Which scanner backend a scan runs against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "scanner_kind")]
pub enum ScannerKind {
    #[sqlx(rename = "dast-a")]
    #[serde(rename = "dast-a")]
    DastA,
    #[sqlx(rename = "dast-b")]
    #[serde(rename = "dast-b")]
    DastB,
    #[sqlx(rename = "sast")]
    #[serde(rename = "sast")]
    Sast,
}

impl std::fmt::Display for ScannerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DastA => write!(f, "dast-a"),
            Self::DastB => write!(f, "dast-b"),
            Self::Sast => write!(f, "sast"),
        }
    }
}

/// Persisted lifecycle status of a scan.
///
/// `Completed` and `Failed` are terminal: once either is stored the record
/// is immutable except by a full re-run creating a new scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "scan_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Phase1Running,
    Phase2Running,
    Finalizing,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire representation, identical to the database enum label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Phase1Running => "phase1_running",
            Self::Phase2Running => "phase2_running",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Core Scan --

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Scan {
    pub id: Uuid,
    pub company_id: Uuid,
    pub kind: ScannerKind,
    pub target: String,
    pub status: ScanStatus,
    pub phase1_external_id: Option<String>,
    pub phase2_external_id: Option<String>,
    pub finding_count: i32,
    pub failure_reason: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting a new scan record.
#[derive(Debug, Clone)]
pub struct CreateScan {
    pub company_id: Uuid,
    pub kind: ScannerKind,
    pub target: String,
    pub created_by: Uuid,
}

/// Request body for starting a scan.
#[derive(Debug, Clone, Deserialize, validator::Validate)]
pub struct CreateScanRequest {
    pub kind: ScannerKind,
    #[validate(length(min = 1, max = 2048))]
    pub target: String,
}

/// Scan enriched with a best-effort live status overlay for list views.
///
/// The overlay fields are informational only and never persisted; the stored
/// `status` remains authoritative.
#[derive(Debug, Clone, Serialize)]
pub struct ScanView {
    #[serde(flatten)]
    pub scan: Scan,
    /// Mapped internal status, or the vendor's status string verbatim when
    /// no mapping exists. Absent for terminal scans.
    pub live_status: Option<String>,
    /// Vendor-reported progress percentage, 0-100. Absent for terminal scans.
    pub live_progress: Option<u8>,
}

impl ScanView {
    /// A view with no live overlay (terminal scans, or vendor unreachable).
    pub fn stored(scan: Scan) -> Self {
        Self {
            scan,
            live_status: None,
            live_progress: None,
        }
    }
}
