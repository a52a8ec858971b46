//! YAML interchange for catalogs and unified sites.
//!
//! Both are written as a multi-document stream: a header document, a list
//! document, and the `...` terminator. Ranges appear as `{ref, beg, end}`
//! with 1-based inclusive coordinates:
//!
//! ```yaml
//! ---
//! version: 1
//! contigs:
//! - name: '16'
//!   size: 12345
//! ---
//! - range: {ref: '16', beg: 100, end: 100}
//!   dna: A
//!   is_ref: true
//!   all_filtered: false
//!   top_AQ: [99]
//!   zygosity_by_GQ: [[100,0],[0,0],[0,0],[0,0],[0,0],[0,0],[0,0],[0,0],[0,0],[0,0]]
//! ...
//! ```
//!
//! Readers are all-or-nothing: any problem anywhere in the stream fails the
//! whole read.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::contigs::ContigTable;
use crate::discovery::{
    Allele, DiscoveredAlleleInfo, DiscoveredAlleles, TopQuality, ZygosityByQuality, GQ_BANDS,
    MAX_COPY_NUMBER, TOP_QUALITY_CAPACITY,
};
use crate::error::{Error, Result};
use crate::range::Range;
use crate::unifier::{DropReason, Mapping, UnificationEntry, UnifiedAllele, UnifiedSite};

/// Format version written by this crate.
pub const FORMAT_VERSION: u32 = 1;

const DOC_START: &str = "---\n";
const TERMINATOR: &str = "...";

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlContig {
    name: String,
    size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogHeader {
    version: u32,
    contigs: Vec<YamlContig>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SitesHeader {
    contigs: Vec<YamlContig>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlRange {
    #[serde(rename = "ref")]
    contig: String,
    beg: u64,
    end: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlAllele {
    range: YamlRange,
    dna: String,
    is_ref: bool,
    all_filtered: bool,
    #[serde(rename = "top_AQ")]
    top_aq: Vec<u32>,
    /// Written only when it differs from the default.
    #[serde(
        rename = "top_AQ_capacity",
        default = "default_top_capacity",
        skip_serializing_if = "is_default_top_capacity"
    )]
    top_aq_capacity: usize,
    /// One row per GQ band, one column per copy number.
    #[serde(rename = "zygosity_by_GQ")]
    zygosity_by_gq: Vec<[u64; MAX_COPY_NUMBER]>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlSiteAllele {
    dna: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    frequency: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlEntry {
    range: YamlRange,
    dna: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dropped: Option<DropReason>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlSite {
    range: YamlRange,
    alleles: Vec<YamlSiteAllele>,
    quality: u32,
    #[serde(default)]
    unification: Vec<YamlEntry>,
}

fn default_top_capacity() -> usize {
    TOP_QUALITY_CAPACITY
}

fn is_default_top_capacity(capacity: &usize) -> bool {
    *capacity == TOP_QUALITY_CAPACITY
}

fn contigs_to_yaml(contigs: &ContigTable) -> Vec<YamlContig> {
    contigs
        .iter()
        .map(|c| YamlContig {
            name: c.name.clone(),
            size: c.length,
        })
        .collect()
}

fn contigs_of_yaml(contigs: Vec<YamlContig>) -> Result<ContigTable> {
    if contigs.is_empty() {
        return Err(Error::MalformedInput("Empty contig table".to_string()));
    }
    let mut table = ContigTable::new();
    for c in contigs {
        if table.rid(&c.name).is_some() {
            return Err(Error::MalformedInput(format!("Duplicate contig {}", c.name)));
        }
        table.push(c.name, c.size);
    }
    Ok(table)
}

fn range_to_yaml(range: &Range, contigs: &ContigTable) -> Result<YamlRange> {
    let contig = contigs
        .name(range.rid)
        .ok_or_else(|| Error::InvalidInput(format!("Range {} has no contig", range)))?;
    Ok(YamlRange {
        contig: contig.to_string(),
        beg: range.beg + 1,
        end: range.end,
    })
}

fn range_of_yaml(range: &YamlRange, contigs: &ContigTable) -> Result<Range> {
    let rid = contigs
        .rid(&range.contig)
        .ok_or_else(|| Error::InvalidInput(format!("Unknown contig {}", range.contig)))?;
    if range.beg == 0 || range.end < range.beg - 1 {
        return Err(Error::MalformedInput(format!(
            "Invalid range {}:{}-{}",
            range.contig, range.beg, range.end
        )));
    }
    let parsed = Range::new(rid, range.beg - 1, range.end);
    contigs.check_range(&parsed)?;
    Ok(parsed)
}

fn zygosity_to_yaml(zygosity: &ZygosityByQuality) -> Vec<[u64; MAX_COPY_NUMBER]> {
    (0..GQ_BANDS)
        .map(|band| [zygosity.get(1, band), zygosity.get(2, band)])
        .collect()
}

fn zygosity_of_yaml(rows: &[[u64; MAX_COPY_NUMBER]]) -> Result<ZygosityByQuality> {
    if rows.len() != GQ_BANDS {
        return Err(Error::MalformedInput(format!(
            "zygosity_by_GQ has {} rows, expected {}",
            rows.len(),
            GQ_BANDS
        )));
    }
    let mut counts = [[0u64; GQ_BANDS]; MAX_COPY_NUMBER];
    for (band, row) in rows.iter().enumerate() {
        for (copy, &count) in row.iter().enumerate() {
            counts[copy][band] = count;
        }
    }
    Ok(ZygosityByQuality::from_counts(counts))
}

fn write_stream<W: Write, H: Serialize, L: Serialize>(mut out: W, header: &H, list: &L) -> Result<()> {
    let mut text = String::from(DOC_START);
    text.push_str(&serde_yaml::to_string(header)?);
    text.push_str(DOC_START);
    text.push_str(&serde_yaml::to_string(list)?);
    text.push_str(TERMINATOR);
    text.push('\n');
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(())
}

/// Split a stream into its header and list documents.
fn read_stream<R: Read, H: DeserializeOwned, L: DeserializeOwned>(mut input: R) -> Result<(H, L)> {
    let mut text = String::new();
    input.read_to_string(&mut text)?;

    let mut body_len = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_end() == TERMINATOR {
            body_len = Some(offset);
            offset += line.len();
            break;
        }
        offset += line.len();
    }
    let body_len = body_len
        .ok_or_else(|| Error::MalformedInput("YAML stream has no '...' terminator".to_string()))?;
    if !text[offset..].trim().is_empty() {
        return Err(Error::MalformedInput(
            "Unexpected text after the '...' terminator".to_string(),
        ));
    }

    let mut docs = serde_yaml::Deserializer::from_str(&text[..body_len]);
    let header_doc = docs
        .next()
        .ok_or_else(|| Error::MalformedInput("YAML stream has no header document".to_string()))?;
    let header = H::deserialize(header_doc)?;
    let list_doc = docs
        .next()
        .ok_or_else(|| Error::MalformedInput("YAML stream has no list document".to_string()))?;
    let list = L::deserialize(list_doc)?;
    if docs.next().is_some() {
        return Err(Error::MalformedInput(
            "YAML stream has more than two documents".to_string(),
        ));
    }
    Ok((header, list))
}

/// A catalog read back from YAML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogStream {
    pub version: u32,
    pub contigs: ContigTable,
    pub catalog: DiscoveredAlleles,
}

/// Write a catalog with its contig table and format version.
pub fn write_catalog<W: Write>(
    out: W,
    version: u32,
    contigs: &ContigTable,
    catalog: &DiscoveredAlleles,
) -> Result<()> {
    let header = CatalogHeader {
        version,
        contigs: contigs_to_yaml(contigs),
    };
    let alleles = catalog
        .iter()
        .map(|(allele, info)| {
            Ok(YamlAllele {
                range: range_to_yaml(&allele.range, contigs)?,
                dna: allele.dna.clone(),
                is_ref: info.is_ref,
                all_filtered: info.all_filtered,
                top_aq: info.top_quality.scores().to_vec(),
                top_aq_capacity: info.top_quality.capacity(),
                zygosity_by_gq: zygosity_to_yaml(&info.zygosity_by_gq),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    write_stream(out, &header, &alleles)
}

/// Read a catalog stream.
///
/// Top-quality lists take their capacity from `top_AQ_capacity`, or the
/// default when it is absent; a list longer than its capacity fails.
pub fn read_catalog<R: Read>(input: R) -> Result<CatalogStream> {
    let (header, alleles): (CatalogHeader, Vec<YamlAllele>) = read_stream(input)?;
    let contigs = contigs_of_yaml(header.contigs)?;

    let mut catalog = DiscoveredAlleles::new();
    for a in alleles {
        let allele = Allele::new(range_of_yaml(&a.range, &contigs)?, a.dna);
        if a.top_aq.len() > a.top_aq_capacity {
            return Err(Error::MalformedInput(format!(
                "Allele {} {} lists {} top_AQ values with capacity {}",
                contigs.format_range(&allele.range),
                allele.dna,
                a.top_aq.len(),
                a.top_aq_capacity
            )));
        }
        let info = DiscoveredAlleleInfo {
            is_ref: a.is_ref,
            all_filtered: a.all_filtered,
            top_quality: TopQuality::from_scores(a.top_aq_capacity, a.top_aq),
            zygosity_by_gq: zygosity_of_yaml(&a.zygosity_by_gq)?,
        };
        if catalog.contains_key(&allele) {
            return Err(Error::MalformedInput(format!(
                "Allele {} {} is listed twice",
                contigs.format_range(&allele.range),
                allele.dna
            )));
        }
        catalog.insert(allele, info);
    }

    Ok(CatalogStream {
        version: header.version,
        contigs,
        catalog,
    })
}

/// Write unified sites with their contig table.
pub fn write_sites<W: Write>(out: W, contigs: &ContigTable, sites: &[UnifiedSite]) -> Result<()> {
    let header = SitesHeader {
        contigs: contigs_to_yaml(contigs),
    };
    let sites = sites
        .iter()
        .map(|site| site_to_yaml(site, contigs))
        .collect::<Result<Vec<_>>>()?;
    write_stream(out, &header, &sites)
}

fn site_to_yaml(site: &UnifiedSite, contigs: &ContigTable) -> Result<YamlSite> {
    let unification = site
        .unification
        .iter()
        .map(|entry| {
            let (to, dropped) = match entry.mapping {
                Mapping::Canonical(i) => (Some(i), None),
                Mapping::Dropped(reason) => (None, Some(reason)),
            };
            Ok(YamlEntry {
                range: range_to_yaml(&entry.range, contigs)?,
                dna: entry.dna.clone(),
                to,
                dropped,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(YamlSite {
        range: range_to_yaml(&site.range, contigs)?,
        alleles: site
            .alleles
            .iter()
            .map(|a| YamlSiteAllele {
                dna: a.dna.clone(),
                frequency: a.frequency,
            })
            .collect(),
        quality: site.quality,
        unification,
    })
}

fn site_of_yaml(site: YamlSite, contigs: &ContigTable) -> Result<UnifiedSite> {
    let range = range_of_yaml(&site.range, contigs)?;
    let unification = site
        .unification
        .into_iter()
        .map(|entry| {
            let mapping = match (entry.to, entry.dropped) {
                (Some(i), None) => Mapping::Canonical(i),
                (None, Some(reason)) => Mapping::Dropped(reason),
                _ => {
                    return Err(Error::MalformedInput(format!(
                        "Unification entry for {} needs exactly one of 'to' and 'dropped'",
                        entry.dna
                    )))
                }
            };
            Ok(UnificationEntry {
                range: range_of_yaml(&entry.range, contigs)?,
                dna: entry.dna,
                mapping,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let parsed = UnifiedSite {
        range,
        alleles: site
            .alleles
            .into_iter()
            .map(|a| UnifiedAllele {
                dna: a.dna,
                frequency: a.frequency,
            })
            .collect(),
        quality: site.quality,
        unification,
    };
    parsed.validate()?;
    Ok(parsed)
}

/// Read a site stream, returning its contig table and sites.
pub fn read_sites<R: Read>(input: R) -> Result<(ContigTable, Vec<UnifiedSite>)> {
    let (header, sites): (SitesHeader, Vec<YamlSite>) = read_stream(input)?;
    let contigs = contigs_of_yaml(header.contigs)?;
    let sites = sites
        .into_iter()
        .map(|s| site_of_yaml(s, &contigs))
        .collect::<Result<Vec<_>>>()?;
    Ok((contigs, sites))
}
