//! Change detection: which listed items are new, and recording them.
//!
//! One run walks the listing page in order. For each entry:
//!
//! ```text
//! identity? ─no─► MissingIdentity
//!   │
//! store.exists? ─yes─► AlreadyKnown        (no detail fetch)
//!   │
//! fetch details ─err─► FetchFailed
//!   │
//! extract ─none─► Unparseable
//!   │
//! eligible? ─no─► Ineligible
//!   │
//! store.insert_if_new ─false─► LostRace
//!   │
//!   └─► New  (appended to the run's new items)
//! ```
//!
//! Store errors on a single entry become `StoreFailed`. Nothing that happens
//! to one entry stops the next one from being evaluated. Only a failure to
//! fetch the listing page itself ends the run, before any entry is touched and
//! without notifying.
//!
//! Identity wins over content: once a link is stored it is never evaluated
//! again, even if its facts change.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::eligibility::EligibilityFilter;
use crate::error::EngineError;
use crate::extract::Extractor;
use crate::models::{CandidateRecord, ListingEntry};
use crate::outputs::{Notifier, NotifyOutcome};
use crate::scrapers::ListingSource;
use crate::store::RecordStore;
use crate::utils::truncate_for_log;

/// What happened to one listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    New,
    MissingIdentity,
    AlreadyKnown,
    FetchFailed,
    Unparseable,
    Ineligible,
    LostRace,
    StoreFailed,
}

/// Per-outcome counts for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntryTally {
    pub new: usize,
    pub missing_identity: usize,
    pub already_known: usize,
    pub fetch_failed: usize,
    pub unparseable: usize,
    pub ineligible: usize,
    pub lost_race: usize,
    pub store_failed: usize,
}

impl EntryTally {
    pub fn record(&mut self, outcome: EntryOutcome) {
        let slot = match outcome {
            EntryOutcome::New => &mut self.new,
            EntryOutcome::MissingIdentity => &mut self.missing_identity,
            EntryOutcome::AlreadyKnown => &mut self.already_known,
            EntryOutcome::FetchFailed => &mut self.fetch_failed,
            EntryOutcome::Unparseable => &mut self.unparseable,
            EntryOutcome::Ineligible => &mut self.ineligible,
            EntryOutcome::LostRace => &mut self.lost_race,
            EntryOutcome::StoreFailed => &mut self.store_failed,
        };
        *slot += 1;
    }
}

/// Result of one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries_seen: usize,
    /// Newly stored items, in listing order.
    pub new_items: Vec<CandidateRecord>,
    pub tally: EntryTally,
    pub notification: NotifyOutcome,
}

/// One change-detection pass over a listing source.
pub struct ChangeDetector {
    source: Arc<dyn ListingSource>,
    store: Arc<dyn RecordStore>,
    extractor: Arc<dyn Extractor>,
    filter: EligibilityFilter,
    notifier: Arc<dyn Notifier>,
}

impl ChangeDetector {
    /// Assemble a detector from its collaborators.
    ///
    /// # Arguments
    ///
    /// * `source` - Listing and detail pages
    /// * `store` - Known items; the single source of truth for novelty
    /// * `extractor` - Turns detail text into age and gender
    /// * `filter` - Thresholds a candidate must meet before it is stored
    /// * `notifier` - Receives the run's new items exactly once per run
    pub fn new(
        source: Arc<dyn ListingSource>,
        store: Arc<dyn RecordStore>,
        extractor: Arc<dyn Extractor>,
        filter: EligibilityFilter,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            store,
            extractor,
            filter,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Execute one full run: scan, record, notify.
    ///
    /// # Errors
    ///
    /// [`EngineError::Listing`] when the listing page cannot be read. Nothing
    /// is stored or notified in that case. Failures on single entries are
    /// counted in the report's tally instead.
    #[instrument(level = "info", skip_all)]
    pub async fn run(&self) -> Result<RunReport, EngineError> {
        let started_at = Utc::now();
        let t0 = Instant::now();
        info!("Checking listing for new items");

        let entries = self.source.fetch_listing().await.map_err(|e| {
            error!(error = %e, "Listing fetch failed; ending run");
            EngineError::Listing(e)
        })?;

        let mut new_items = Vec::new();
        let mut tally = EntryTally::default();
        for (index, entry) in entries.iter().enumerate() {
            let outcome = self.process_entry(index, entry, &mut new_items).await;
            tally.record(outcome);
        }

        let notification = self.notifier.notify(&new_items).await;

        let finished_at = Utc::now();
        info!(
            entries = entries.len(),
            new = tally.new,
            known = tally.already_known,
            ineligible = tally.ineligible,
            unparseable = tally.unparseable,
            fetch_failed = tally.fetch_failed,
            store_failed = tally.store_failed,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Run complete"
        );

        Ok(RunReport {
            started_at,
            finished_at,
            entries_seen: entries.len(),
            new_items,
            tally,
            notification,
        })
    }

    async fn process_entry(
        &self,
        index: usize,
        entry: &ListingEntry,
        new_items: &mut Vec<CandidateRecord>,
    ) -> EntryOutcome {
        let Some((name, link)) = entry.identity() else {
            warn!(index, ?entry, "Listing entry without name or link; skipping");
            return EntryOutcome::MissingIdentity;
        };

        match self.store.exists(link).await {
            Ok(true) => {
                debug!(index, name, link, "Already known; skipping");
                return EntryOutcome::AlreadyKnown;
            }
            Ok(false) => {}
            Err(e) => {
                error!(index, name, link, error = %e, "Existence check failed; skipping");
                return EntryOutcome::StoreFailed;
            }
        }

        let facts_text = match self.source.fetch_details(link).await {
            Ok(text) => text,
            Err(e) => {
                error!(index, name, link, error = %e, "Detail fetch failed; skipping");
                return EntryOutcome::FetchFailed;
            }
        };

        let Some(facts) = self.extractor.extract(&facts_text) else {
            debug!(
                index,
                name,
                link,
                facts = %truncate_for_log(&facts_text, 200),
                "Facts unparseable; skipping"
            );
            return EntryOutcome::Unparseable;
        };

        let candidate = CandidateRecord::from_facts(name, link, facts);
        let verdict = self.filter.evaluate(&candidate);
        if !verdict.is_eligible() {
            info!(
                index,
                name,
                age = ?candidate.age,
                gender = ?candidate.gender,
                reason = verdict.reason(),
                "Not eligible; skipping"
            );
            return EntryOutcome::Ineligible;
        }

        match self.store.insert_if_new(&candidate).await {
            Ok(true) => {
                info!(index, name, link, "Adding new item");
                new_items.push(candidate);
                EntryOutcome::New
            }
            Ok(false) => {
                info!(index, name, link, "Already stored by another run; skipping");
                EntryOutcome::LostRace
            }
            Err(e) => {
                error!(index, name, link, error = %e, "Insert failed; skipping");
                EntryOutcome::StoreFailed
            }
        }
    }
}
