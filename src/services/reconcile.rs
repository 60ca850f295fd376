//! Status reconciliation for bulk scan list views.
//!
//! Persisted scan records are merged with one bulk live-status fetch per
//! vendor, so N scans never cost N external calls. Terminal records take
//! precedence: a scan that finished or failed keeps its stored state no
//! matter what the vendor reports later. Live values are attached to the
//! response only; nothing is written back on read, leaving the lifecycle
//! controller as the sole status writer.

use std::collections::HashMap;

use crate::models::scan::{Scan, ScanView, ScannerKind};
use crate::scanners::{LiveStatus, ScannerAdapter, ScannerRegistry};

/// Merge one persisted scan with the live-status lookup for its vendor.
pub fn overlay(
    scan: Scan,
    live: &HashMap<String, LiveStatus>,
    adapter: &dyn ScannerAdapter,
) -> ScanView {
    if scan.status.is_terminal() {
        // Terminal precedence: never downgraded by a live report.
        return ScanView::stored(scan);
    }

    let current_phase_id = scan
        .phase2_external_id
        .as_deref()
        .or(scan.phase1_external_id.as_deref());
    let Some(status) = current_phase_id.and_then(|id| live.get(id)) else {
        return ScanView::stored(scan);
    };

    let live_status = match adapter.map_status(&status.status) {
        Some(mapped) => mapped.as_str().to_string(),
        None => {
            // Vendors add status values without notice; pass the string
            // through rather than erroring.
            tracing::warn!(
                scan_id = %scan.id,
                kind = %scan.kind,
                vendor_status = %status.status,
                "Unmapped vendor status passed through verbatim"
            );
            status.status.clone()
        }
    };

    ScanView {
        scan,
        live_status: Some(live_status),
        live_progress: Some(status.progress),
    }
}

/// Reconcile a company's scan list against live vendor state.
///
/// For each scanner kind with at least one non-terminal row, one bulk
/// status call is made. A vendor that cannot be reached degrades to stored
/// statuses with a warning instead of failing the read.
pub async fn reconcile_scans(registry: &ScannerRegistry, scans: Vec<Scan>) -> Vec<ScanView> {
    let mut live_by_kind: HashMap<ScannerKind, HashMap<String, LiveStatus>> = HashMap::new();

    for scan in &scans {
        if scan.status.is_terminal() || live_by_kind.contains_key(&scan.kind) {
            continue;
        }
        let Some(adapter) = registry.get(scan.kind) else {
            continue;
        };
        match adapter.fetch_live_statuses().await {
            Ok(statuses) => {
                live_by_kind.insert(
                    scan.kind,
                    statuses
                        .into_iter()
                        .map(|s| (s.external_id.clone(), s))
                        .collect(),
                );
            }
            Err(e) => {
                tracing::warn!(
                    kind = %scan.kind,
                    error = %e,
                    "Bulk status fetch failed, using stored statuses"
                );
                // Remember the failure so the kind is not fetched again.
                live_by_kind.insert(scan.kind, HashMap::new());
            }
        }
    }

    let empty = HashMap::new();
    scans
        .into_iter()
        .map(|scan| match registry.get(scan.kind) {
            Some(adapter) => overlay(
                scan,
                live_by_kind.get(&adapter.kind()).unwrap_or(&empty),
                adapter.as_ref(),
            ),
            None => ScanView::stored(scan),
        })
        .collect()
}
