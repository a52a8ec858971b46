//! Per-record validation during ingestion.
//!
//! Two kinds of problems are told apart: a malformed record (unknown contig,
//! out-of-bounds coordinates, invalid sequence, bad allele index, wrong
//! quality arity) can be skipped, whereas an ordering violation (a contig
//! revisited after another one, or a position going backwards) always
//! rejects the source.

use rustc_hash::FxHashSet;

use super::reader::VariantRecord;
use crate::contigs::ContigTable;
use crate::range::Range;

/// Why a record was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordIssue {
    Malformed(String),
    Ordering(String),
}

impl RecordIssue {
    pub fn reason(&self) -> &str {
        match self {
            RecordIssue::Malformed(r) | RecordIssue::Ordering(r) => r,
        }
    }
}

/// True for a non-empty sequence of A, C, G, T and N.
pub fn is_valid_dna(seq: &str) -> bool {
    !seq.is_empty() && seq.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T' | b'N'))
}

/// Inline validator for a source's record stream.
#[derive(Debug)]
pub struct RecordValidator<'a> {
    contigs: &'a ContigTable,
    prev_rid: Option<u32>,
    prev_pos: u64,
    seen_rids: FxHashSet<u32>,
}

impl<'a> RecordValidator<'a> {
    pub fn new(contigs: &'a ContigTable) -> Self {
        Self {
            contigs,
            prev_rid: None,
            prev_pos: 0,
            seen_rids: FxHashSet::default(),
        }
    }

    /// Check a record and return the reference range it covers.
    ///
    /// Only accepted records move the ordering baseline, so a skipped record
    /// never causes later ones to look out of order.
    pub fn validate(&mut self, rec: &VariantRecord) -> Result<Range, RecordIssue> {
        let rid = self
            .contigs
            .rid(&rec.contig)
            .ok_or_else(|| RecordIssue::Malformed(format!("Unknown contig {}", rec.contig)))?;

        match self.prev_rid {
            Some(prev) if prev != rid => {
                if self.seen_rids.contains(&rid) {
                    return Err(RecordIssue::Ordering(format!(
                        "Contig {} at line {} was seen earlier (contigs must be contiguous)",
                        rec.contig, rec.line
                    )));
                }
            }
            Some(_) if rec.pos < self.prev_pos => {
                return Err(RecordIssue::Ordering(format!(
                    "Position {} at line {} comes after {} on {}",
                    rec.pos, rec.line, self.prev_pos, rec.contig
                )));
            }
            _ => {}
        }

        if rec.pos == 0 {
            return Err(RecordIssue::Malformed("Position 0 (positions are 1-based)".to_string()));
        }
        if !is_valid_dna(&rec.ref_allele) {
            return Err(RecordIssue::Malformed(format!(
                "Invalid reference allele '{}'",
                rec.ref_allele
            )));
        }
        if let Some(alt) = rec.alts.iter().find(|a| !is_valid_dna(a)) {
            return Err(RecordIssue::Malformed(format!("Invalid alternate allele '{}'", alt)));
        }

        let beg = rec.pos - 1;
        // rid came from the table, so only the length can fail.
        let length = self.contigs.get(rid).map_or(0, |c| c.length);
        let end = beg
            .checked_add(rec.ref_allele.len() as u64)
            .filter(|&end| end <= length);
        let Some(end) = end else {
            return Err(RecordIssue::Malformed(format!(
                "Record {}:{} extends past contig length {}",
                rec.contig, rec.pos, length
            )));
        };
        let range = Range::new(rid, beg, end);

        if let Some(bad) = rec.genotype.iter().flatten().find(|&&g| g > rec.alts.len()) {
            return Err(RecordIssue::Malformed(format!(
                "Genotype index {} with {} alternate allele(s)",
                bad,
                rec.alts.len()
            )));
        }
        if !rec.aq.is_empty() && rec.aq.len() != rec.alts.len() {
            return Err(RecordIssue::Malformed(format!(
                "{} AQ value(s) for {} alternate allele(s)",
                rec.aq.len(),
                rec.alts.len()
            )));
        }

        if let Some(prev) = self.prev_rid.filter(|&prev| prev != rid) {
            self.seen_rids.insert(prev);
        }
        self.prev_rid = Some(rid);
        self.prev_pos = rec.pos;
        Ok(range)
    }
}
