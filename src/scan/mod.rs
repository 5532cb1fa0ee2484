use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

use crate::store::{MailStore, StoreError};

pub mod date;

pub use date::{parse_date_boundary, DateFormatError};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    DateFormat(#[from] DateFormatError),
}

/// Immutable configuration for one scan run.
#[derive(Debug, Clone)]
pub struct ScanBoundary {
    /// Literal substring matched against the From header, case-sensitively.
    pub sender: String,
    /// Messages dated strictly before this stop the scan.
    pub cutoff: NaiveDate,
    /// Hard cap on accumulated deletion candidates.
    pub max_candidates: usize,
    /// Requested ids per listing page.
    pub page_size: u32,
    /// Pause between per-message fetches, to stay under provider rate
    /// limits. Not a correctness mechanism.
    pub throttle: Duration,
}

/// How a completed (non-aborted) scan ended. Aborts are the `Err` arm of
/// [`run_scan`], never an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The listing ran out of pages.
    Exhausted,
    /// The candidate cap was reached.
    StoppedAtLimit,
    /// A message older than the cutoff was encountered.
    StoppedAtCutoff,
    /// A full page went by with nothing accumulated; the scan short-circuits
    /// rather than walking the rest of the mailbox.
    NoMatches,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub processed: usize,
    pub candidates: Vec<String>,
    pub outcome: ScanOutcome,
}

/// Accumulation state for a scan in progress. Mutation is monotonic:
/// `processed` only increments, `candidates` only appends, and the stop flag
/// is set at most once.
#[derive(Debug, Default)]
struct ScanState {
    processed: usize,
    candidates: Vec<String>,
    stopped: Option<ScanOutcome>,
}

impl ScanState {
    fn stop(&mut self, outcome: ScanOutcome) {
        if self.stopped.is_none() {
            self.stopped = Some(outcome);
        }
    }

    fn into_report(self, outcome: ScanOutcome) -> ScanReport {
        ScanReport {
            processed: self.processed,
            candidates: self.candidates,
            outcome,
        }
    }
}

/// True iff `target` appears literally in the From header. Case-sensitive,
/// matching the header's raw encoding; the empty target matches everything.
pub fn sender_matches(from_header: &str, target: &str) -> bool {
    from_header.contains(target)
}

/// Walk the mailbox newest-first, accumulating deletion candidates from
/// `boundary.sender` until a stop condition fires.
///
/// Per message, the stop checks (candidate cap, cutoff date) are evaluated
/// before the sender match, so a message that triggers a stop is neither
/// filtered nor counted as a candidate. The cutoff rule is only sound
/// because messages.list returns newest-first; see DESIGN.md.
///
/// Any transport, not-found, or date-parse failure aborts the whole scan
/// with no deletion attempted.
pub async fn run_scan<S: MailStore>(
    store: &S,
    boundary: &ScanBoundary,
) -> Result<ScanReport, ScanError> {
    let mut state = ScanState::default();
    let mut page_token: Option<String> = None;

    loop {
        let page = store
            .list_page(boundary.page_size, page_token.as_deref())
            .await?;
        debug!(
            "scanning page: {} ids, more={}",
            page.ids.len(),
            page.next_page_token.is_some()
        );

        for id in &page.ids {
            let summary = store.fetch_summary(id).await?;
            state.processed += 1;

            let message_date = parse_date_boundary(&summary.date_raw)?;

            if state.candidates.len() >= boundary.max_candidates {
                state.stop(ScanOutcome::StoppedAtLimit);
                break;
            }
            if message_date < boundary.cutoff {
                state.stop(ScanOutcome::StoppedAtCutoff);
                break;
            }

            if sender_matches(&summary.from, &boundary.sender) {
                println!(
                    "Id: {}\nFrom: {}\nDate: {}\nSubject: {}\n",
                    summary.id, summary.from, summary.date_raw, summary.subject
                );
                state.candidates.push(id.clone());
            }

            if !boundary.throttle.is_zero() {
                sleep(boundary.throttle).await;
            }
        }

        // A page that yielded nothing at all means the target has no recent
        // mail; stop here instead of walking the whole mailbox.
        if state.candidates.is_empty() {
            return Ok(state.into_report(ScanOutcome::NoMatches));
        }

        if let Some(outcome) = state.stopped {
            return Ok(state.into_report(outcome));
        }

        // An empty id list ends the listing even if a token came back.
        page_token = if page.ids.is_empty() {
            None
        } else {
            page.next_page_token
        };
        if page_token.is_none() {
            return Ok(state.into_report(ScanOutcome::Exhausted));
        }
    }
}
