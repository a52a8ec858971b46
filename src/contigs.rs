//! Contig table: the coordinate system every range is expressed in.
//!
//! Loads from genome files (tab-delimited: name\tlength) and parses the
//! `<contig>:<begin>-<end>` range notation (1-based, inclusive bounds).

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};
use crate::range::Range;

/// A named reference sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contig {
    pub name: String,
    pub length: u64,
}

/// Ordered contig table. A contig's position in the table is its `rid`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Contig>", into = "Vec<Contig>")]
pub struct ContigTable {
    contigs: Vec<Contig>,
    by_name: FxHashMap<String, u32>,
}

impl PartialEq for ContigTable {
    fn eq(&self, other: &Self) -> bool {
        self.contigs == other.contigs
    }
}

impl Eq for ContigTable {}

impl From<Vec<Contig>> for ContigTable {
    fn from(contigs: Vec<Contig>) -> Self {
        let mut table = ContigTable::new();
        for contig in contigs {
            table.push(contig.name, contig.length);
        }
        table
    }
}

impl From<ContigTable> for Vec<Contig> {
    fn from(table: ContigTable) -> Self {
        table.contigs
    }
}

impl ContigTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(name, length)` pairs.
    pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, u64)>) -> Self {
        let mut table = ContigTable::new();
        for (name, length) in pairs {
            table.push(name, length);
        }
        table
    }

    /// Load a table from a genome file.
    /// Format: tab-delimited with name\tlength per line
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut table = ContigTable::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 2 {
                return Err(Error::Parse {
                    line: line_num + 1,
                    message: "Genome file requires two columns: name and length".to_string(),
                });
            }

            let length: u64 = fields[1].parse().map_err(|_| Error::Parse {
                line: line_num + 1,
                message: format!("Invalid contig length: {}", fields[1]),
            })?;

            if table.rid(fields[0]).is_some() {
                return Err(Error::Parse {
                    line: line_num + 1,
                    message: format!("Duplicate contig: {}", fields[0]),
                });
            }
            table.push(fields[0], length);
        }

        Ok(table)
    }

    /// Append a contig. Re-adding a known name keeps the first entry.
    pub fn push(&mut self, name: impl Into<String>, length: u64) {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return;
        }
        self.by_name.insert(name.clone(), self.contigs.len() as u32);
        self.contigs.push(Contig { name, length });
    }

    /// Look up a contig id by name.
    #[inline]
    pub fn rid(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    #[inline]
    pub fn get(&self, rid: u32) -> Option<&Contig> {
        self.contigs.get(rid as usize)
    }

    #[inline]
    pub fn name(&self, rid: u32) -> Option<&str> {
        self.get(rid).map(|c| c.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contig> {
        self.contigs.iter()
    }

    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }

    /// Check that a range lies inside its contig.
    pub fn check_range(&self, range: &Range) -> Result<()> {
        let contig = self
            .get(range.rid)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown contig id {}", range.rid)))?;
        if range.beg > range.end || range.end > contig.length {
            return Err(Error::InvalidInput(format!(
                "Range {}:{}-{} is outside contig bounds (length {})",
                contig.name, range.beg, range.end, contig.length
            )));
        }
        Ok(())
    }

    /// Render a range in `<contig>:<begin>-<end>` notation (1-based, inclusive).
    pub fn format_range(&self, range: &Range) -> String {
        match self.name(range.rid) {
            Some(name) => format!("{}:{}-{}", name, range.beg + 1, range.end),
            None => range.to_string(),
        }
    }

    /// Parse `<contig>:<begin>-<end>` (1-based, inclusive) into a half-open range.
    pub fn parse_range(&self, text: &str) -> Result<Range> {
        let text = text.trim();
        let invalid = |why: &str| Error::InvalidInput(format!("Range '{}': {}", text, why));

        let (name, coords) = text
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected <contig>:<begin>-<end>"))?;
        let (beg, end) = coords
            .split_once('-')
            .ok_or_else(|| invalid("expected <begin>-<end>"))?;
        let beg: u64 = beg
            .trim()
            .parse()
            .map_err(|_| invalid("begin is not a number"))?;
        let end: u64 = end
            .trim()
            .parse()
            .map_err(|_| invalid("end is not a number"))?;

        let rid = self.rid(name).ok_or_else(|| invalid("unknown contig"))?;
        let length = self.contigs[rid as usize].length;
        if beg < 1 || end < beg || end > length {
            return Err(invalid(&format!("coordinates out of bounds (length {})", length)));
        }
        Ok(Range::new(rid, beg - 1, end))
    }

    /// Parse a comma-separated list of ranges. Fails if any element fails.
    pub fn parse_ranges(&self, text: &str) -> Result<Vec<Range>> {
        text.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| self.parse_range(s))
            .collect::<Result<Vec<_>>>()
            .and_then(|ranges| {
                if ranges.is_empty() {
                    Err(Error::InvalidInput(format!("No ranges in '{}'", text)))
                } else {
                    Ok(ranges)
                }
            })
    }

    /// The whole extent of every contig, in table order.
    pub fn full_ranges(&self) -> Vec<Range> {
        self.contigs
            .iter()
            .enumerate()
            .map(|(rid, c)| Range::new(rid as u32, 0, c.length))
            .collect()
    }
}
