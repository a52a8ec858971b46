//! siteforge: population-level variant site unification
//!
//! Usage: siteforge <COMMAND> [OPTIONS]

use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::info;
use tracing_subscriber::EnvFilter;

use siteforge::bed::{read_regions, write_regions};
use siteforge::loader::{FileSource, RecordSource};
use siteforge::parallel::discover_chunks;
use siteforge::yaml::{self, FORMAT_VERSION};
use siteforge::{
    bulk_load, check_iteration_consistency, discover_windows, load_yaml_file, reduce_catalogs,
    unify_catalog, AlleleStore, ContigTable, Error, LoaderConfig, RangeIndex, Result,
    UnifierConfig,
};

#[derive(Parser)]
#[command(name = "siteforge")]
#[command(version)]
#[command(about = "Merge per-sample variant records into unified population sites", long_about = None)]
struct Cli {
    /// Number of threads to use (default: number of CPUs)
    #[arg(long, short = 't', global = true)]
    threads: Option<usize>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty database for a genome
    Init {
        /// Database snapshot to create
        #[arg(long)]
        db: PathBuf,

        /// Genome file (name<TAB>length per line)
        #[arg(short = 'g', long)]
        genome: PathBuf,
    },

    /// Bulk load record files into a database
    Load {
        #[arg(long)]
        db: PathBuf,

        /// Only ingest records overlapping these BED regions
        #[arg(long)]
        regions: Option<PathBuf>,

        /// Skip malformed records instead of rejecting their file
        #[arg(long)]
        skip_malformed: bool,

        /// Loader configuration (YAML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Record files
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },

    /// Export the discovered-allele catalog of a database
    Discover {
        #[arg(long)]
        db: PathBuf,

        /// Ranges such as 17:100-2000,17:5000-6000 (1-based, inclusive)
        #[arg(long, conflicts_with = "regions")]
        range: Option<String>,

        /// BED file of regions
        #[arg(long)]
        regions: Option<PathBuf>,

        /// Output YAML (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge catalog YAML files into one
    MergeCatalogs {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Unify a catalog into canonical sites
    Unify {
        /// Catalog YAML
        #[arg(long)]
        catalog: PathBuf,

        /// Number of samples the catalog was discovered from
        #[arg(long)]
        cohort_size: u64,

        /// Unifier configuration (YAML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Only unify alleles overlapping these BED regions
        #[arg(long)]
        regions: Option<PathBuf>,

        #[arg(long)]
        min_quality: Option<u32>,

        #[arg(long)]
        min_frequency: Option<f64>,

        #[arg(long)]
        max_alt_alleles: Option<usize>,

        /// Output YAML (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the unification windows of a catalog as BED
    Windows {
        #[arg(long)]
        catalog: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that every iteration strategy reads the same database contents
    CheckIter {
        #[arg(long)]
        db: PathBuf,

        #[arg(long, default_value = "50")]
        iterations: usize,

        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("siteforge=debug,info")
    } else {
        EnvFilter::new("siteforge=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();

    // Configure thread pool if --threads specified
    if let Some(n) = cli.threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(n).build_global() {
            eprintln!("Error: failed to initialize thread pool: {}", e);
            process::exit(1);
        }
    }

    let result = match cli.command {
        Commands::Init { db, genome } => run_init(db, genome),

        Commands::Load {
            db,
            regions,
            skip_malformed,
            config,
            sources,
        } => run_load(db, regions, skip_malformed, config, cli.threads, sources),

        Commands::Discover {
            db,
            range,
            regions,
            output,
        } => run_discover(db, range, regions, output),

        Commands::MergeCatalogs { inputs, output } => run_merge_catalogs(inputs, output),

        Commands::Unify {
            catalog,
            cohort_size,
            config,
            regions,
            min_quality,
            min_frequency,
            max_alt_alleles,
            output,
        } => {
            let overrides = UnifierOverrides {
                min_quality,
                min_frequency,
                max_alt_alleles,
            };
            run_unify(catalog, cohort_size, config, regions, overrides, output)
        }

        Commands::Windows { catalog, output } => run_windows(catalog, output),

        Commands::CheckIter {
            db,
            iterations,
            seed,
        } => run_check_iter(db, iterations, seed),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn open_output(path: Option<PathBuf>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(p) => Box::new(BufWriter::new(File::create(p)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

fn read_catalog_file(path: &Path) -> Result<yaml::CatalogStream> {
    let file = File::open(path).map_err(|e| {
        Error::InvalidInput(format!("Failed to open catalog {}: {}", path.display(), e))
    })?;
    yaml::read_catalog(io::BufReader::new(file))
}

fn target_index(regions: Option<PathBuf>, contigs: &ContigTable) -> Result<Option<RangeIndex>> {
    regions
        .map(|path| read_regions(path, contigs).map(RangeIndex::from_union))
        .transpose()
}

fn run_init(db: PathBuf, genome: PathBuf) -> Result<()> {
    if db.exists() {
        return Err(Error::InvalidInput(format!(
            "Database {} already exists",
            db.display()
        )));
    }
    let contigs = ContigTable::from_file(&genome)?;
    let store = AlleleStore::in_memory();
    store.init(&contigs)?;
    store.save(&db)?;
    info!(db = %db.display(), contigs = contigs.len(), "database created");
    Ok(())
}

fn run_load(
    db: PathBuf,
    regions: Option<PathBuf>,
    skip_malformed: bool,
    config: Option<PathBuf>,
    threads: Option<usize>,
    sources: Vec<PathBuf>,
) -> Result<()> {
    let mut config: LoaderConfig = match config {
        Some(path) => load_yaml_file(path)?,
        None => LoaderConfig {
            threads: rayon::current_num_threads(),
            ..Default::default()
        },
    };
    if skip_malformed {
        config.skip_malformed = true;
    }
    if let Some(n) = threads {
        config.threads = n;
    }

    let store = AlleleStore::open(&db)?;
    let contigs = store.contigs()?;
    let targets = target_index(regions, &contigs)?;

    let sources: Vec<Box<dyn RecordSource>> = sources
        .into_iter()
        .map(|p| Box::new(FileSource::new(p)) as Box<dyn RecordSource>)
        .collect();
    let report = bulk_load(&store, &sources, &config, targets.as_ref())?;
    store.save(&db)?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    writeln!(out, "#source\tstate\trecords\talleles\tskipped\treason")?;
    for o in &report.outcomes {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            o.name,
            o.state,
            o.records,
            o.alleles,
            o.skipped.len(),
            o.error.as_deref().unwrap_or(".")
        )?;
    }
    out.flush()?;

    let rejected = report.rejected().count();
    if rejected > 0 {
        return Err(Error::InvalidInput(format!(
            "{} of {} sources rejected",
            rejected,
            report.outcomes.len()
        )));
    }
    Ok(())
}

fn run_discover(
    db: PathBuf,
    range: Option<String>,
    regions: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let store = AlleleStore::open(&db)?;
    let contigs = store.contigs()?;
    let ranges = match (range, regions) {
        (Some(text), _) => Some(contigs.parse_ranges(&text)?),
        (None, Some(path)) => Some(read_regions(path, &contigs)?),
        (None, None) => None,
    };
    let catalog = match ranges {
        None => store.discovered_alleles(&[])?,
        Some(ranges) => {
            // Disjoint ranges, so no allele is scanned twice.
            let ranges = RangeIndex::from_union(ranges).ranges().to_vec();
            discover_chunks(ranges, |range| store.discovered_alleles(&[range]))?
        }
    };
    info!(alleles = catalog.len(), "catalog exported");
    yaml::write_catalog(open_output(output)?, FORMAT_VERSION, &contigs, &catalog)
}

fn run_merge_catalogs(inputs: Vec<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let streams = inputs
        .par_iter()
        .map(|path| read_catalog_file(path))
        .collect::<Result<Vec<_>>>()?;

    let first = streams
        .first()
        .ok_or_else(|| Error::InvalidInput("No catalogs to merge".to_string()))?;
    for (stream, path) in streams.iter().zip(&inputs).skip(1) {
        if stream.contigs != first.contigs {
            return Err(Error::InvalidInput(format!(
                "{} has a different contig table than {}",
                path.display(),
                inputs[0].display()
            )));
        }
        if stream.version != first.version {
            return Err(Error::InvalidInput(format!(
                "{} has format version {}, expected {}",
                path.display(),
                stream.version,
                first.version
            )));
        }
    }

    let (version, contigs) = (first.version, first.contigs.clone());
    let merged = reduce_catalogs(streams.into_iter().map(|s| s.catalog).collect());
    info!(inputs = inputs.len(), alleles = merged.len(), "catalogs merged");
    yaml::write_catalog(open_output(output)?, version, &contigs, &merged)
}

struct UnifierOverrides {
    min_quality: Option<u32>,
    min_frequency: Option<f64>,
    max_alt_alleles: Option<usize>,
}

fn run_unify(
    catalog: PathBuf,
    cohort_size: u64,
    config: Option<PathBuf>,
    regions: Option<PathBuf>,
    overrides: UnifierOverrides,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut config: UnifierConfig = match config {
        Some(path) => load_yaml_file(path)?,
        None => UnifierConfig::default(),
    };
    if let Some(q) = overrides.min_quality {
        config.min_quality = q;
    }
    if let Some(f) = overrides.min_frequency {
        config.min_frequency = f;
    }
    if let Some(n) = overrides.max_alt_alleles {
        config.max_alt_alleles = n;
    }

    let stream = read_catalog_file(&catalog)?;
    let targets = target_index(regions, &stream.contigs)?;
    let sites = unify_catalog(stream.catalog, cohort_size, &config, targets.as_ref())?;
    yaml::write_sites(open_output(output)?, &stream.contigs, &sites)
}

fn run_windows(catalog: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let stream = read_catalog_file(&catalog)?;
    let windows = discover_windows(&stream.catalog);
    write_regions(open_output(output)?, &windows, &stream.contigs)
}

fn run_check_iter(db: PathBuf, iterations: usize, seed: u64) -> Result<()> {
    let store = AlleleStore::open(&db)?;
    let report = check_iteration_consistency(&store, iterations, seed)?;
    println!(
        "{} iterations consistent ({} records per pass)",
        report.iterations, report.records
    );
    Ok(())
}
