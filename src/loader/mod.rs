//! Concurrent bulk loading of record sources into an [`AlleleStore`].
//!
//! Every source moves through `Pending -> Validating -> Ingesting ->
//! Committed | Rejected`. A source is ingested into a private catalog and
//! committed as one atomic batch, so nothing of a rejected source ever
//! reaches the store. Workers pull sources from a shared queue.

mod reader;
mod validation;

pub use reader::{FileSource, RecordReader, RecordSource, TextSource, TsvRecordReader, VariantRecord};
pub use validation::{is_valid_dna, RecordIssue, RecordValidator};

use crossbeam_channel::unbounded;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::contigs::ContigTable;
use crate::discovery::{observe, Allele, DiscoveredAlleles};
use crate::error::{Error, Result};
use crate::index::RangeIndex;
use crate::range::Range;
use crate::store::{AlleleStore, KeyValueStore, SourceSummary};

/// Lifecycle of one source during a bulk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Pending,
    Validating,
    Ingesting,
    Committed,
    Rejected,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceState::Pending => "pending",
            SourceState::Validating => "validating",
            SourceState::Ingesting => "ingesting",
            SourceState::Committed => "committed",
            SourceState::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// A record left out under the skip policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub line: usize,
    pub reason: String,
}

/// Final state of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOutcome {
    pub name: String,
    pub state: SourceState,
    /// Records accepted into the source's catalog.
    pub records: u64,
    pub alleles: u64,
    pub skipped: Vec<SkippedRecord>,
    /// Rejection reason.
    pub error: Option<String>,
}

impl SourceOutcome {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: SourceState::Pending,
            records: 0,
            alleles: 0,
            skipped: Vec::new(),
            error: None,
        }
    }

    fn transition(&mut self, state: SourceState) {
        debug!(source = %self.name, from = %self.state, to = %state, "source state");
        self.state = state;
    }
}

/// Outcomes in the order the sources were given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub outcomes: Vec<SourceOutcome>,
}

impl LoadReport {
    pub fn committed(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.outcomes.iter().filter(|o| o.state == SourceState::Committed)
    }

    pub fn rejected(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.outcomes.iter().filter(|o| o.state == SourceState::Rejected)
    }

    pub fn all_committed(&self) -> bool {
        self.outcomes.iter().all(|o| o.state == SourceState::Committed)
    }
}

/// Loads sources into a store on a pool of worker threads.
pub struct BulkLoader<'a, S> {
    store: &'a AlleleStore<S>,
    config: LoaderConfig,
    targets: Option<&'a RangeIndex>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, S: KeyValueStore> BulkLoader<'a, S> {
    pub fn new(store: &'a AlleleStore<S>, config: LoaderConfig) -> Self {
        Self {
            store,
            config,
            targets: None,
            cancel: None,
        }
    }

    /// Only records overlapping these regions are ingested.
    pub fn with_targets(mut self, targets: &'a RangeIndex) -> Self {
        self.targets = Some(targets);
        self
    }

    /// Sources that have not committed when the flag is raised are rejected.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Load every source. Per-source failures end up in the report; only
    /// failures of the store itself (e.g. no contig table) are returned as
    /// errors.
    pub fn load(&self, sources: &[Box<dyn RecordSource>]) -> Result<LoadReport> {
        let contigs = self.store.contigs()?;
        let threads = self.config.threads.max(1).min(sources.len().max(1));
        info!(sources = sources.len(), threads, "bulk load starting");

        let (job_tx, job_rx) = unbounded::<(usize, &dyn RecordSource)>();
        let (done_tx, done_rx) = unbounded::<(usize, SourceOutcome)>();
        for (i, source) in sources.iter().enumerate() {
            // Receiver is alive until the scope below ends.
            let _ = job_tx.send((i, source.as_ref()));
        }
        drop(job_tx);

        thread::scope(|scope| {
            for _ in 0..threads {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                let contigs = &contigs;
                scope.spawn(move || {
                    for (i, source) in job_rx.iter() {
                        let outcome = self.load_source(source, contigs);
                        let _ = done_tx.send((i, outcome));
                    }
                });
            }
        });
        drop(done_tx);

        let mut outcomes: Vec<(usize, SourceOutcome)> = done_rx.iter().collect();
        outcomes.sort_by_key(|(i, _)| *i);
        let report = LoadReport {
            outcomes: outcomes.into_iter().map(|(_, o)| o).collect(),
        };
        info!(
            committed = report.committed().count(),
            rejected = report.rejected().count(),
            "bulk load finished"
        );
        Ok(report)
    }

    fn load_source(&self, source: &dyn RecordSource, contigs: &ContigTable) -> SourceOutcome {
        let mut outcome = SourceOutcome::new(source.name());
        let result = self.ingest(source, contigs, &mut outcome);
        match result {
            Ok(()) => outcome.transition(SourceState::Committed),
            Err(e) => {
                let reason = match e {
                    Error::SourceRejected { reason, .. } => reason,
                    other => other.to_string(),
                };
                warn!(source = %outcome.name, %reason, "source rejected");
                outcome.transition(SourceState::Rejected);
                outcome.error = Some(reason);
            }
        }
        outcome
    }

    fn ingest(
        &self,
        source: &dyn RecordSource,
        contigs: &ContigTable,
        outcome: &mut SourceOutcome,
    ) -> Result<()> {
        let name = source.name();
        outcome.transition(SourceState::Validating);
        if self.cancelled() {
            return Err(Error::rejected(name, "load cancelled"));
        }
        if self.store.has_source(name)? {
            return Err(Error::rejected(name, "source was already loaded"));
        }
        let mut reader = source
            .open()
            .map_err(|e| Error::rejected(name, format!("cannot open: {}", e)))?;
        if reader.contigs() != contigs {
            return Err(Error::rejected(name, "contig table differs from the store's"));
        }

        outcome.transition(SourceState::Ingesting);
        let mut catalog = DiscoveredAlleles::new();
        let mut validator = RecordValidator::new(contigs);
        while let Some(rec) = reader.read_record()? {
            if self.cancelled() {
                return Err(Error::rejected(name, "load cancelled"));
            }
            let range = match validator.validate(&rec) {
                Ok(range) => range,
                Err(RecordIssue::Malformed(reason)) if self.config.skip_malformed => {
                    warn!(source = name, line = rec.line, %reason, "skipping record");
                    outcome.skipped.push(SkippedRecord {
                        line: rec.line,
                        reason,
                    });
                    continue;
                }
                Err(issue) => {
                    return Err(Error::rejected(
                        name,
                        format!("line {}: {}", rec.line, issue.reason()),
                    ))
                }
            };
            if let Some(targets) = self.targets {
                if !targets.has_overlap(&range) {
                    continue;
                }
            }
            observe_record(&mut catalog, &rec, range);
            outcome.records += 1;
        }

        if self.cancelled() {
            return Err(Error::rejected(name, "load cancelled"));
        }
        outcome.alleles = catalog.len() as u64;
        let summary = SourceSummary {
            records: outcome.records,
            alleles: outcome.alleles,
            skipped: outcome.skipped.len() as u64,
        };
        self.store.commit_source(name, &catalog, &summary)
    }
}

/// Add one record's alleles to a source catalog.
///
/// The reference allele is always recorded. Every allele gets its called
/// copy number in the GQ bucket; alternates are scored by AQ and the
/// reference by GQ.
pub fn observe_record(catalog: &mut DiscoveredAlleles, rec: &VariantRecord, range: Range) {
    let gq = rec.gq.unwrap_or(0);
    let copies = |index: usize| match rec.copies_of(index) {
        0 => None,
        n => Some((n, gq)),
    };

    observe(
        catalog,
        Allele::new(range, rec.ref_allele.as_str()),
        true,
        rec.filtered,
        rec.gq,
        copies(0),
    );
    for (i, alt) in rec.alts.iter().enumerate() {
        observe(
            catalog,
            Allele::new(range, alt.as_str()),
            false,
            rec.filtered,
            rec.aq.get(i).copied(),
            copies(i + 1),
        );
    }
}

/// Load sources into a store with the given configuration.
pub fn bulk_load<S: KeyValueStore>(
    store: &AlleleStore<S>,
    sources: &[Box<dyn RecordSource>],
    config: &LoaderConfig,
    targets: Option<&RangeIndex>,
) -> Result<LoadReport> {
    let loader = BulkLoader::new(store, config.clone());
    match targets {
        Some(targets) => loader.with_targets(targets).load(sources),
        None => loader.load(sources),
    }
}
