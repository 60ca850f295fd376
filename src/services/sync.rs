//! Finding synchronization: fetch-generation replacement for a scan.
//!
//! Scans are re-run, and their finding set must always reflect exactly one
//! fetch generation. The store's replace operation is all-or-nothing, so an
//! interrupted sync never leaves a scan half-rewritten.

use uuid::Uuid;

use crate::errors::AppError;
use crate::models::finding::NewFinding;
use crate::scanners::RawFinding;
use crate::store::FindingStore;

/// Replace the persisted finding set for `scan_id` with the given fetch
/// result, returning the number of rows saved.
///
/// Items missing a mandatory field (affected URL or rule name) are skipped
/// and logged rather than aborting — partial vendor data is expected. A
/// non-empty result set in which every item is invalid indicates a
/// malformed page and aborts the whole operation before any write.
pub async fn replace(
    store: &dyn FindingStore,
    scan_id: Uuid,
    raw: &[RawFinding],
) -> Result<u64, AppError> {
    let mut valid = Vec::with_capacity(raw.len());
    let mut skipped = 0usize;

    for (index, item) in raw.iter().enumerate() {
        match NewFinding::from_raw(scan_id, item) {
            Some(finding) => valid.push(finding),
            None => {
                skipped += 1;
                tracing::warn!(
                    %scan_id,
                    index,
                    "Skipping finding with missing mandatory fields"
                );
            }
        }
    }

    if !raw.is_empty() && valid.is_empty() {
        return Err(AppError::Validation(
            "every finding in the fetched result set was missing mandatory fields".to_string(),
        ));
    }

    let saved = store.replace_for_scan(scan_id, &valid).await?;
    tracing::info!(%scan_id, saved, skipped, "Finding set replaced");
    Ok(saved)
}
