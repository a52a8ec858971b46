//! Tab-delimited variant record reader.
//!
//! A source starts with `#contig<TAB>name<TAB>length` header lines, followed
//! by one record per line:
//!
//! ```text
//! contig  pos  ref  alts|.  GT  GQ|.  AQ,...|.  FILTER
//! ```
//!
//! `pos` is 1-based. Only the shape of each line is checked here; semantic
//! checks (known contig, bounds, allele indices) belong to the validator.

use memchr::{memchr, memchr_iter};
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};

use crate::contigs::ContigTable;
use crate::error::{Error, Result};

/// Number of tab-separated fields in a record line.
const RECORD_FIELDS: usize = 8;

/// One record line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantRecord {
    pub line: usize,
    pub contig: String,
    /// 1-based position of the first reference base.
    pub pos: u64,
    pub ref_allele: String,
    pub alts: Vec<String>,
    /// Called allele indices; `None` for a no-call.
    pub genotype: Vec<Option<usize>>,
    pub gq: Option<u32>,
    /// Per-alternate quality, empty when absent.
    pub aq: Vec<u32>,
    pub filtered: bool,
}

impl VariantRecord {
    /// Number of called copies of allele `index` (0 is the reference).
    pub fn copies_of(&self, index: usize) -> usize {
        self.genotype.iter().filter(|&&g| g == Some(index)).count()
    }
}

/// Sequential access to one source's records.
pub trait RecordReader: Send {
    fn contigs(&self) -> &ContigTable;

    /// Next record, or `None` at end of input. Format errors are fatal.
    fn read_record(&mut self) -> Result<Option<VariantRecord>>;
}

/// A named input that can be opened into a [`RecordReader`].
pub trait RecordSource: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self) -> Result<Box<dyn RecordReader + '_>>;
}

/// Fast u64 parsing without allocation.
#[inline(always)]
pub(crate) fn parse_u64_fast(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() || bytes.len() > 20 {
        return None;
    }
    let mut n: u64 = 0;
    for &b in bytes {
        let d = b.wrapping_sub(b'0');
        if d > 9 {
            return None;
        }
        n = n.checked_mul(10)?.checked_add(d as u64)?;
    }
    Some(n)
}

fn trim_line_end(mut line: &[u8]) -> &[u8] {
    while let Some((&last, rest)) = line.split_last() {
        if last == b'\n' || last == b'\r' {
            line = rest;
        } else {
            break;
        }
    }
    line
}

fn split_tabs(line: &[u8]) -> Vec<&[u8]> {
    let mut fields = Vec::with_capacity(RECORD_FIELDS);
    let mut start = 0;
    for tab in memchr_iter(b'\t', line) {
        fields.push(&line[start..tab]);
        start = tab + 1;
    }
    fields.push(&line[start..]);
    fields
}

/// Reader for the tab-delimited record format.
pub struct TsvRecordReader<R: BufRead> {
    reader: R,
    contigs: ContigTable,
    buf: Vec<u8>,
    line_number: usize,
    /// First record line, read while scanning the header.
    pending: Option<Vec<u8>>,
}

impl<R: BufRead> TsvRecordReader<R> {
    /// Read the contig header, stopping at the first record line.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut contigs = ContigTable::new();
        let mut buf = Vec::new();
        let mut line_number = 0;
        let mut pending = None;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_number += 1;
            let line = trim_line_end(&buf);
            if line.is_empty() {
                continue;
            }
            if line[0] != b'#' {
                pending = Some(line.to_vec());
                break;
            }
            if !line.starts_with(b"#contig\t") {
                continue;
            }
            let fields = split_tabs(line);
            if fields.len() != 3 {
                return Err(Error::Parse {
                    line: line_number,
                    message: "Contig header needs a name and a length".to_string(),
                });
            }
            let name = std::str::from_utf8(fields[1]).map_err(|_| Error::Parse {
                line: line_number,
                message: "Contig name is not UTF-8".to_string(),
            })?;
            let length = parse_u64_fast(fields[2]).ok_or_else(|| Error::Parse {
                line: line_number,
                message: format!("Invalid contig length for {}", name),
            })?;
            if contigs.rid(name).is_some() {
                return Err(Error::Parse {
                    line: line_number,
                    message: format!("Duplicate contig {}", name),
                });
            }
            contigs.push(name, length);
        }

        Ok(Self {
            reader,
            contigs,
            buf,
            line_number,
            pending,
        })
    }

    fn parse_error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            line: self.line_number,
            message: message.into(),
        }
    }

    fn parse_line(&self, line: &[u8]) -> Result<VariantRecord> {
        let fields = split_tabs(line);
        if fields.len() != RECORD_FIELDS {
            return Err(self.parse_error(format!(
                "Expected {} fields, found {}",
                RECORD_FIELDS,
                fields.len()
            )));
        }

        let text = |i: usize| -> Result<&str> {
            std::str::from_utf8(fields[i]).map_err(|_| self.parse_error("Field is not UTF-8"))
        };

        let pos = parse_u64_fast(fields[1])
            .ok_or_else(|| self.parse_error(format!("Invalid position: {}", text(1).unwrap_or("?"))))?;

        let alts = match fields[3] {
            b"." => Vec::new(),
            _ => text(3)?.split(',').map(str::to_string).collect(),
        };

        let mut genotype = Vec::with_capacity(2);
        let gt = fields[4];
        let mut start = 0;
        let separators = gt
            .iter()
            .enumerate()
            .filter(|&(_, b)| *b == b'/' || *b == b'|')
            .map(|(i, _)| i)
            .chain(std::iter::once(gt.len()));
        for sep in separators {
            let call = &gt[start..sep];
            start = sep + 1;
            genotype.push(match call {
                b"." => None,
                digits => Some(
                    parse_u64_fast(digits).ok_or_else(|| self.parse_error("Invalid genotype"))? as usize,
                ),
            });
        }

        let gq = match fields[5] {
            b"." => None,
            raw => Some(parse_quality(raw).ok_or_else(|| self.parse_error("Invalid GQ"))?),
        };

        let aq = match fields[6] {
            b"." => Vec::new(),
            raw => {
                let mut scores = Vec::new();
                let mut rest = raw;
                loop {
                    let end = memchr(b',', rest).unwrap_or(rest.len());
                    scores.push(parse_quality(&rest[..end]).ok_or_else(|| self.parse_error("Invalid AQ"))?);
                    if end == rest.len() {
                        break;
                    }
                    rest = &rest[end + 1..];
                }
                scores
            }
        };

        let filtered = !matches!(fields[7], b"PASS" | b".");

        Ok(VariantRecord {
            line: self.line_number,
            contig: text(0)?.to_string(),
            pos,
            ref_allele: text(2)?.to_string(),
            alts,
            genotype,
            gq,
            aq,
            filtered,
        })
    }
}

fn parse_quality(bytes: &[u8]) -> Option<u32> {
    parse_u64_fast(bytes).and_then(|v| u32::try_from(v).ok())
}

impl<R: BufRead + Send> RecordReader for TsvRecordReader<R> {
    fn contigs(&self) -> &ContigTable {
        &self.contigs
    }

    fn read_record(&mut self) -> Result<Option<VariantRecord>> {
        if let Some(line) = self.pending.take() {
            return self.parse_line(&line).map(Some);
        }
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            let line = trim_line_end(&self.buf).to_vec();
            if line.is_empty() {
                continue;
            }
            if line[0] == b'#' {
                return Err(self.parse_error("Header line after the first record"));
            }
            return self.parse_line(&line).map(Some);
        }
    }
}

/// A record file on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    path: PathBuf,
}

impl FileSource {
    /// Named after the file name.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { name, path }
    }

    pub fn with_name<P: AsRef<Path>>(name: impl Into<String>, path: P) -> Self {
        Self {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<Box<dyn RecordReader + '_>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(TsvRecordReader::new(BufReader::new(file))?))
    }
}

/// A source held in memory.
#[derive(Debug, Clone)]
pub struct TextSource {
    name: String,
    text: String,
}

impl TextSource {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

impl RecordSource for TextSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<Box<dyn RecordReader + '_>> {
        Ok(Box::new(TsvRecordReader::new(Cursor::new(self.text.as_bytes()))?))
    }
}
