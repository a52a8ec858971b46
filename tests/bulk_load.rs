//! Bulk loading record files from disk into a snapshot-backed store.

use std::io::Write;
use tempfile::{tempdir, NamedTempFile};

use siteforge::loader::{FileSource, RecordSource};
use siteforge::{bulk_load, AlleleStore, ContigTable, LoaderConfig, MemoryStore, RangeIndex, Range, SourceState};

const HEADER: &str = "#contig\t1\t10000\n#contig\t2\t5000\n";

fn contigs() -> ContigTable {
    ContigTable::from_pairs([("1", 10000u64), ("2", 5000)])
}

fn fresh_store() -> AlleleStore<MemoryStore> {
    let store = AlleleStore::in_memory();
    store.init(&contigs()).unwrap();
    store
}

fn record_file(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}{}", HEADER, body).unwrap();
    file.flush().unwrap();
    file
}

/// One synthetic sample: a het SNV every 50bp and a deletion on contig 2.
fn sample_body(sample: u64) -> String {
    let mut body = String::new();
    for i in 0..40u64 {
        let pos = 100 + i * 50;
        let (alt, gt) = if (i + sample) % 3 == 0 { ("T", "1/1") } else { ("G", "0/1") };
        body.push_str(&format!("1\t{}\tA\t{}\t{}\t{}\t{}\tPASS\n", pos, alt, gt, 30 + sample, 40 + i));
    }
    body.push_str(&format!("2\t{}\tACGT\tA\t0/1\t50\t60\tPASS\n", 200 + sample));
    body
}

fn file_sources(files: &[NamedTempFile]) -> Vec<Box<dyn RecordSource>> {
    files
        .iter()
        .map(|f| Box::new(FileSource::new(f.path())) as Box<dyn RecordSource>)
        .collect()
}

#[test]
fn test_parallel_load_matches_serial_load() {
    let files: Vec<NamedTempFile> = (0..8).map(|s| record_file(&sample_body(s))).collect();
    let sources = file_sources(&files);

    let serial = fresh_store();
    let config = LoaderConfig { threads: 1, ..Default::default() };
    assert!(bulk_load(&serial, &sources, &config, None).unwrap().all_committed());

    let parallel = fresh_store();
    let config = LoaderConfig { threads: 4, ..Default::default() };
    let report = bulk_load(&parallel, &sources, &config, None).unwrap();
    assert!(report.all_committed());
    assert_eq!(report.outcomes.len(), 8);
    for (outcome, file) in report.outcomes.iter().zip(&files) {
        let name = file.path().file_name().unwrap().to_string_lossy();
        assert_eq!(outcome.name, name);
        assert_eq!(outcome.records, 41);
    }

    assert_eq!(
        serial.discovered_alleles(&[]).unwrap(),
        parallel.discovered_alleles(&[]).unwrap()
    );
    assert_eq!(parallel.cohort_size().unwrap(), 8);
}

#[test]
fn test_bad_file_is_rejected_without_side_effects() {
    let good = record_file(&sample_body(0));
    let bad = record_file("1\t100\tA\tG\t0/1\t30\t40\tPASS\n1\t90\tA\tG\t0/1\t30\t40\tPASS\n");
    let store = fresh_store();

    let report = bulk_load(&store, &file_sources(&[good, bad]), &LoaderConfig::default(), None).unwrap();
    assert_eq!(report.outcomes[0].state, SourceState::Committed);
    assert_eq!(report.outcomes[1].state, SourceState::Rejected);
    assert!(report.outcomes[1].error.as_deref().unwrap().contains("line"));

    let loaded = store.sources().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].1.records, 41);
}

#[test]
fn test_missing_file_is_rejected() {
    let store = fresh_store();
    let sources: Vec<Box<dyn RecordSource>> =
        vec![Box::new(FileSource::with_name("ghost", "/nonexistent/ghost.tsv"))];
    let report = bulk_load(&store, &sources, &LoaderConfig::default(), None).unwrap();
    assert_eq!(report.outcomes[0].state, SourceState::Rejected);
    assert!(store.discovered_alleles(&[]).unwrap().is_empty());
}

#[test]
fn test_skip_malformed_records() {
    let file = record_file(
        "1\t100\tA\tG\t0/1\t30\t40\tPASS\n\
         1\t150\tA\tZ\t0/1\t30\t40\tPASS\n\
         1\t200\tC\tT\t1/1\t30\t40\tPASS\n\
         2\t4999\tACGT\tA\t0/1\t30\t40\tPASS\n",
    );
    let store = fresh_store();
    let config = LoaderConfig { skip_malformed: true, ..Default::default() };
    let report = bulk_load(&store, &file_sources(&[file]), &config, None).unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.state, SourceState::Committed);
    assert_eq!(outcome.records, 2);
    assert_eq!(outcome.skipped.iter().map(|s| s.line).collect::<Vec<_>>(), vec![4, 6]);
    assert_eq!(store.discovered_alleles(&[]).unwrap().len(), 4);
}

#[test]
fn test_skipped_positions_do_not_break_ordering() {
    let file = record_file(
        "1\t100\tA\tG\t0/1\t30\t40\tPASS\n\
         1\t99999\tA\tG\t0/1\t30\t40\tPASS\n\
         1\t18446744073709551615\tAC\tA\t0/1\t30\t40\tPASS\n\
         1\t200\tC\tT\t1/1\t30\t40\tPASS\n",
    );
    let good = record_file(&sample_body(2));
    let store = fresh_store();
    let config = LoaderConfig { skip_malformed: true, threads: 2 };
    let report = bulk_load(&store, &file_sources(&[file, good]), &config, None).unwrap();

    assert!(report.all_committed());
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.records, 2);
    assert_eq!(outcome.skipped.iter().map(|s| s.line).collect::<Vec<_>>(), vec![4, 5]);
    assert_eq!(report.outcomes[1].records, 41);
    assert!(store
        .discovered_alleles(&[])
        .unwrap()
        .keys()
        .all(|a| a.range.beg <= a.range.end));
}

#[test]
fn test_target_regions_limit_ingestion() {
    let file = record_file(&sample_body(1));
    let store = fresh_store();
    let targets = RangeIndex::from_union(vec![Range::new(0, 0, 500), Range::new(1, 0, 5000)]);
    let report = bulk_load(&store, &file_sources(&[file]), &LoaderConfig::default(), Some(&targets)).unwrap();
    assert!(report.all_committed());

    let catalog = store.discovered_alleles(&[]).unwrap();
    assert!(catalog.keys().all(|a| targets.has_overlap(&a.range)));
    // Positions 100..=500 on contig 1 plus the deletion on contig 2.
    assert_eq!(report.outcomes[0].records, 10);
}

#[test]
fn test_snapshot_survives_reopen() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("cohort.db");
    let files: Vec<NamedTempFile> = (0..3).map(|s| record_file(&sample_body(s))).collect();

    let store = fresh_store();
    bulk_load(&store, &file_sources(&files), &LoaderConfig::default(), None).unwrap();
    store.save(&db).unwrap();

    let reopened = AlleleStore::open(&db).unwrap();
    assert_eq!(reopened.contigs().unwrap(), contigs());
    assert_eq!(reopened.cohort_size().unwrap(), 3);
    assert_eq!(
        reopened.discovered_alleles(&[]).unwrap(),
        store.discovered_alleles(&[]).unwrap()
    );

    // A second load of the same file is refused and leaves the snapshot as it was.
    let again = bulk_load(&reopened, &file_sources(&files[..1]), &LoaderConfig::default(), None).unwrap();
    assert_eq!(again.outcomes[0].state, SourceState::Rejected);
    assert_eq!(reopened.cohort_size().unwrap(), 3);
}
