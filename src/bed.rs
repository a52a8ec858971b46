//! BED region lists: import against a contig table, and output.

use crate::contigs::ContigTable;
use crate::error::{Error, Result};
use crate::range::Range;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Output buffer size for BED writing (256 KB).
const OUTPUT_BUFFER: usize = 256 * 1024;

/// A streaming BED region reader resolving contig names to ids.
pub struct RegionReader<'a, R: Read> {
    reader: BufReader<R>,
    contigs: &'a ContigTable,
    line_number: usize,
    buffer: String,
}

impl<'a> RegionReader<'a, File> {
    /// Open a BED file from a path.
    pub fn from_path<P: AsRef<Path>>(path: P, contigs: &'a ContigTable) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(file, contigs))
    }
}

impl<'a, R: Read> RegionReader<'a, R> {
    pub fn new(reader: R, contigs: &'a ContigTable) -> Self {
        Self {
            reader: BufReader::new(reader),
            contigs,
            line_number: 0,
            buffer: String::with_capacity(256),
        }
    }

    /// Read the next region.
    pub fn read_range(&mut self) -> Result<Option<Range>> {
        loop {
            self.buffer.clear();
            let bytes_read = self.reader.read_line(&mut self.buffer)?;
            if bytes_read == 0 {
                return Ok(None);
            }
            self.line_number += 1;

            let line = self.buffer.trim();
            if line.is_empty()
                || line.starts_with('#')
                || line.starts_with("track")
                || line.starts_with("browser")
            {
                continue;
            }

            return self.parse_line(line).map(Some);
        }
    }

    fn parse_line(&self, line: &str) -> Result<Range> {
        let fields: Vec<&str> = line.split('\t').collect();

        if fields.len() < 3 {
            return Err(self.error(format!("Expected at least 3 fields, got {}", fields.len())));
        }

        let rid = self
            .contigs
            .rid(fields[0])
            .ok_or_else(|| self.error(format!("Unknown contig '{}'", fields[0])))?;
        let beg = self.parse_position(fields[1], "start")?;
        let end = self.parse_position(fields[2], "end")?;

        if beg > end {
            return Err(self.error(format!("Start ({}) > end ({})", beg, end)));
        }

        let range = Range::new(rid, beg, end);
        self.contigs
            .check_range(&range)
            .map_err(|e| self.error(e.to_string()))?;
        Ok(range)
    }

    fn parse_position(&self, s: &str, field_name: &str) -> Result<u64> {
        s.parse()
            .map_err(|_| self.error(format!("Invalid {} position: '{}'", field_name, s)))
    }

    fn error(&self, message: String) -> Error {
        Error::Parse {
            line: self.line_number,
            message,
        }
    }

    /// Get an iterator over all regions.
    pub fn ranges(self) -> RegionIter<'a, R> {
        RegionIter { reader: self }
    }
}

/// Iterator over BED regions.
pub struct RegionIter<'a, R: Read> {
    reader: RegionReader<'a, R>,
}

impl<R: Read> Iterator for RegionIter<'_, R> {
    type Item = Result<Range>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_range().transpose()
    }
}

/// Read all regions of a BED file, in file order.
pub fn read_regions<P: AsRef<Path>>(path: P, contigs: &ContigTable) -> Result<Vec<Range>> {
    RegionReader::from_path(path, contigs)?.ranges().collect()
}

/// Parse regions from a string (useful for testing).
pub fn parse_regions(content: &str, contigs: &ContigTable) -> Result<Vec<Range>> {
    RegionReader::new(content.as_bytes(), contigs).ranges().collect()
}

/// Write ranges as BED3 lines using contig names.
pub fn write_regions<W: Write>(output: W, ranges: &[Range], contigs: &ContigTable) -> Result<()> {
    let mut writer = BufWriter::with_capacity(OUTPUT_BUFFER, output);
    let mut itoa_buf = itoa::Buffer::new();

    for range in ranges {
        let name = contigs
            .name(range.rid)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown contig id {}", range.rid)))?;
        writer.write_all(name.as_bytes())?;
        writer.write_all(b"\t")?;
        writer.write_all(itoa_buf.format(range.beg).as_bytes())?;
        writer.write_all(b"\t")?;
        writer.write_all(itoa_buf.format(range.end).as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
