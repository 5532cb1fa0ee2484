use thiserror::Error;
use tracing::info;

use crate::confirm::Confirm;
use crate::scan::{run_scan, ScanBoundary, ScanError, ScanOutcome};
use crate::store::{MailStore, StoreError};

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("batch delete failed: {0}")]
    Delete(#[source] StoreError),

    #[error("read confirmation: {0}")]
    Confirm(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub processed: usize,
    pub matched: usize,
    pub outcome: ScanOutcome,
    /// False when the operator declined or nothing matched; deletion was not
    /// attempted in either case.
    pub deleted: bool,
}

/// The full workflow: scan, summarize, gate on operator confirmation, then
/// issue the irreversible batch delete. Either the scan completes and reaches
/// the gate, or it aborts with zero deletions performed. The delete itself is
/// attempted at most once and never retried here.
pub async fn run_purge<S, C>(
    store: &S,
    gate: &mut C,
    boundary: &ScanBoundary,
) -> Result<PurgeReport, PurgeError>
where
    S: MailStore,
    C: Confirm,
{
    let scan = run_scan(store, boundary).await?;
    let matched = scan.candidates.len();

    if scan.candidates.is_empty() {
        println!("No messages found from '{}'.", boundary.sender);
        return Ok(PurgeReport {
            processed: scan.processed,
            matched,
            outcome: scan.outcome,
            deleted: false,
        });
    }

    println!("Processed {} messages", scan.processed);
    let prompt = format!("Proceed deleting {matched} messages [y/N]: ");
    if !gate.confirm(&prompt)? {
        println!("Aborted; nothing deleted.");
        return Ok(PurgeReport {
            processed: scan.processed,
            matched,
            outcome: scan.outcome,
            deleted: false,
        });
    }

    info!("deleting {matched} messages");
    store
        .batch_delete(&scan.candidates)
        .await
        .map_err(PurgeError::Delete)?;
    info!("deletion succeeded");

    Ok(PurgeReport {
        processed: scan.processed,
        matched,
        outcome: scan.outcome,
        deleted: true,
    })
}
