//! Key layout.
//!
//! Allele keys are `'a' | rid u32 | beg u64 | end u64 | dna`, big-endian, so
//! byte order equals `(rid, beg, end, dna)` order and a genomic range maps
//! onto one contiguous key range.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::ops::Bound;

use crate::discovery::Allele;
use crate::error::{Error, Result};
use crate::range::Range;

pub const ALLELE_PREFIX: u8 = b'a';
pub(crate) const SOURCE_PREFIX: u8 = b's';
pub(crate) const CONTIGS_KEY: &[u8] = b"c:contigs";

const ALLELE_HEADER: usize = 1 + 4 + 8 + 8;

pub fn allele_key(allele: &Allele) -> Vec<u8> {
    let mut key = Vec::with_capacity(ALLELE_HEADER + allele.dna.len());
    key.push(ALLELE_PREFIX);
    // Writes into a Vec cannot fail.
    let _ = key.write_u32::<BigEndian>(allele.range.rid);
    let _ = key.write_u64::<BigEndian>(allele.range.beg);
    let _ = key.write_u64::<BigEndian>(allele.range.end);
    key.extend_from_slice(allele.dna.as_bytes());
    key
}

pub fn decode_allele_key(key: &[u8]) -> Result<Allele> {
    if key.len() < ALLELE_HEADER || key[0] != ALLELE_PREFIX {
        return Err(Error::Store(format!("Not an allele key: {:?}", key)));
    }
    let rid = BigEndian::read_u32(&key[1..5]);
    let beg = BigEndian::read_u64(&key[5..13]);
    let end = BigEndian::read_u64(&key[13..21]);
    let dna = std::str::from_utf8(&key[ALLELE_HEADER..])
        .map_err(|_| Error::Store("Allele key holds a non-UTF-8 sequence".to_string()))?;
    Ok(Allele::new(Range::new(rid, beg, end), dna))
}

/// Prefix of every allele key beginning at `(rid, beg)`.
fn position_prefix(rid: u32, beg: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 4 + 8);
    key.push(ALLELE_PREFIX);
    let _ = key.write_u32::<BigEndian>(rid);
    let _ = key.write_u64::<BigEndian>(beg);
    key
}

/// Key bounds selecting alleles whose begin lies in `range`.
pub fn allele_key_bounds(range: &Range) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    (
        Bound::Included(position_prefix(range.rid, range.beg)),
        Bound::Excluded(position_prefix(range.rid, range.end)),
    )
}

/// Key bounds covering the entire allele key space.
pub fn all_allele_bounds() -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    (
        Bound::Included(vec![ALLELE_PREFIX]),
        Bound::Excluded(vec![ALLELE_PREFIX + 1]),
    )
}

pub(crate) fn source_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + name.len());
    key.push(SOURCE_PREFIX);
    key.push(b':');
    key.extend_from_slice(name.as_bytes());
    key
}
