use anyhow::{Context, Result};
use chrono::Datelike;
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use keggprof::catalog::{version_file_path, write_version_file, Catalog, CatalogBuild};
use keggprof::download;
use keggprof::profile::{profile, write_coverage_table, write_step_coverage_table};
use keggprof::tsvio::{create_text_writer, read_kos, read_two_column_table};

#[derive(Parser)]
#[command(name = "keggprof")]
#[command(version)]
#[command(about = "KEGG module completeness profiling from KO annotations")]
#[command(long_about = r#"
keggprof - KEGG module completeness profiling

Compiles KEGG module definitions into weighted pathway graphs and scores
how completely a genome's KO annotations realize each module via its most
complete source-to-sink path.

WORKFLOW:
  1. keggprof build-catalog     Compile definitions into a reusable catalog
  2. keggprof profile-coverage  Score genomes against the catalog

EXAMPLES:
  # Build from local tables
  keggprof build-catalog -i definitions.tsv -n names.tsv -c classes.tsv \
      -o db/pathways.db.gz

  # Build from the KEGG REST service
  keggprof build-catalog --download -o db/pathways.db.gz

  # Profile a KO table: [id_genome]<tab>[id_ko], no header
  keggprof profile-coverage -i genomes.kos.tsv.gz -d db/pathways.db.gz \
      -o coverage_output/ -p 8
"#)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the module catalog from definition tables or the KEGG REST service
    BuildCatalog(BuildCatalogArgs),
    /// Profile module completeness for one or more genomes
    ProfileCoverage(ProfileCoverageArgs),
}

#[derive(Args)]
struct BuildCatalogArgs {
    /// Module definitions TSV: [id_pathway]<tab>[definition], no header
    #[arg(short = 'i', long, value_name = "FILE", help_heading = "Input")]
    definitions: Option<PathBuf>,

    /// Module names TSV: [id_pathway]<tab>[name], no header
    #[arg(short = 'n', long, value_name = "FILE", help_heading = "Input")]
    names: Option<PathBuf>,

    /// Module classes TSV: [id_pathway]<tab>[class], no header
    #[arg(short = 'c', long, value_name = "FILE", help_heading = "Input")]
    classes: Option<PathBuf>,

    /// Output catalog path (gzip-compressed)
    #[arg(short = 'o', long, value_name = "FILE", help_heading = "Output")]
    output: PathBuf,

    /// Version tag for the companion .version file [default: KEGG_v<date>]
    #[arg(short = 'V', long = "version-tag", value_name = "TAG", help_heading = "Output")]
    version_tag: Option<String>,

    /// Fetch definitions, names, and classes from the KEGG REST service
    #[arg(long, help_heading = "Download")]
    download: bool,

    /// Directory for raw downloaded records [default: <catalog dir>/pathway_data]
    #[arg(long = "intermediate-dir", value_name = "DIR", help_heading = "Download")]
    intermediate_dir: Option<PathBuf>,

    /// Skip writing raw downloaded records
    #[arg(long = "no-intermediate-files", help_heading = "Download")]
    no_intermediate_files: bool,

    /// Overwrite an existing catalog and tolerate unparseable definitions
    #[arg(short = 'f', long)]
    force: bool,
}

#[derive(Args)]
struct ProfileCoverageArgs {
    /// KO list: one KO per line, or [id_genome]<tab>[id_ko], no header
    #[arg(short = 'i', long, value_name = "FILE", help_heading = "Input")]
    kos: PathBuf,

    /// Genome name, required when --kos holds a single KO column
    #[arg(short = 'n', long, value_name = "NAME", help_heading = "Input")]
    name: Option<String>,

    /// Catalog built by build-catalog
    #[arg(short = 'd', long, value_name = "FILE", help_heading = "Input")]
    database: PathBuf,

    /// Output directory for coverage tables
    #[arg(
        short = 'o',
        long = "output-dir",
        value_name = "DIR",
        default_value = "keggprof_output",
        help_heading = "Output"
    )]
    output_dir: PathBuf,

    /// Row index name for the output tables
    #[arg(
        long = "index-name",
        value_name = "NAME",
        default_value = "id_genome",
        help_heading = "Output"
    )]
    index_name: String,

    /// Number of threads [0 = auto-detect]
    #[arg(short = 'p', long = "n-jobs", value_name = "NUM", default_value = "1", help_heading = "Runtime")]
    n_jobs: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let start_time = Instant::now();

    match cli.command {
        Command::BuildCatalog(args) => run_build_catalog(args)?,
        Command::ProfileCoverage(args) => run_profile_coverage(args)?,
    }

    eprintln!("Total time: {:.1}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

// ============================================================================
// build-catalog
// ============================================================================

fn run_build_catalog(args: BuildCatalogArgs) -> Result<()> {
    if args.download {
        if args.definitions.is_some() || args.names.is_some() || args.classes.is_some() {
            anyhow::bail!(
                "--download replaces the local tables; do not combine it with \
                 -i/--definitions, -n/--names, or -c/--classes"
            );
        }
    } else if args.definitions.is_none() || args.names.is_none() || args.classes.is_none() {
        anyhow::bail!(
            "without --download, all of -i/--definitions, -n/--names, and \
             -c/--classes must be provided"
        );
    }

    if args.output.exists() && !args.force {
        anyhow::bail!(
            "{} already exists. To overwrite, use -f/--force",
            args.output.display()
        );
    }

    let version_tag = args.version_tag.clone().unwrap_or_else(default_version_tag);

    eprintln!("============================================================");
    eprintln!(" keggprof catalog builder");
    eprintln!("============================================================");
    eprintln!();
    eprintln!("Catalog version: {}", version_tag);

    let (definitions, names, classes) = if args.download {
        fetch_tables(&args)?
    } else {
        let definitions_path = args.definitions.as_ref().unwrap();
        let names_path = args.names.as_ref().unwrap();
        let classes_path = args.classes.as_ref().unwrap();

        eprintln!("Reading module definitions: {}", definitions_path.display());
        let definitions = read_two_column_table(definitions_path)?;
        eprintln!("Reading module names: {}", names_path.display());
        let names = read_two_column_table(names_path)?;
        eprintln!("Reading module classes: {}", classes_path.display());
        let classes = read_two_column_table(classes_path)?;
        (definitions, names, classes)
    };

    eprintln!("Compiling {} module definitions...", definitions.len());
    let CatalogBuild { catalog, failures } = Catalog::build(&definitions, &names, &classes)?;

    for (id, error) in &failures {
        eprintln!("  skipped {}: {}", id, error);
    }
    if !failures.is_empty() && !args.force {
        anyhow::bail!(
            "{} module definition(s) failed to parse; use -f/--force to build without them",
            failures.len()
        );
    }

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    eprintln!("Writing catalog: {}", args.output.display());
    catalog.save(&args.output)?;

    let version_path = write_version_file(&args.output, &version_tag)?;
    eprintln!("Writing version file: {}", version_path.display());

    let table_path = version_file_path(&args.output).with_extension("tsv");
    eprintln!("Writing module KO table: {}", table_path.display());
    catalog.write_module_ko_table(&table_path)?;

    let size_in_bytes = fs::metadata(&args.output)?.len();
    eprintln!();
    eprintln!("Catalog size: {} bytes", size_in_bytes);
    eprintln!("Number of pathways: {}", catalog.len());
    eprintln!("Number of unique KOs: {}", catalog.kos().len());

    Ok(())
}

/// Fetches the three module tables from the KEGG REST service, mirroring the
/// raw records into the intermediate directory unless suppressed.
fn fetch_tables(
    args: &BuildCatalogArgs,
) -> Result<(BTreeMap<String, String>, BTreeMap<String, String>, BTreeMap<String, String>)> {
    let intermediate_dir = args.intermediate_dir.clone().unwrap_or_else(|| {
        args.output
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default()
            .join("pathway_data")
    });
    if !args.no_intermediate_files {
        fs::create_dir_all(intermediate_dir.join("pathways"))?;
    }

    eprintln!("Fetching KEGG module list...");
    let modules = download::fetch_module_list()?;
    eprintln!("  {} modules listed", modules.len());

    let mut names = BTreeMap::new();
    for (id, name) in &modules {
        names.insert(id.clone(), name.clone());
    }
    if !args.no_intermediate_files {
        let path = intermediate_dir.join("pathway_names.tsv.gz");
        let mut writer = create_text_writer(&path)?;
        for (id, name) in &modules {
            writeln!(writer, "{}\t{}", id, name)?;
        }
        writer.flush()?;
    }

    let mut definitions = BTreeMap::new();
    let mut classes = BTreeMap::new();
    for (count, (id, _)) in modules.iter().enumerate() {
        let record = download::fetch_module_record(id)?;
        if !args.no_intermediate_files {
            let path = intermediate_dir.join("pathways").join(format!("{}.txt.gz", id));
            let mut writer = create_text_writer(&path)?;
            writer.write_all(record.as_bytes())?;
            writer.flush()?;
        }
        let fields = download::extract_record_fields(&record);
        if let Some(definition) = fields.definition {
            definitions.insert(id.clone(), definition);
        }
        if let Some(class) = fields.classes {
            classes.insert(id.clone(), class);
        }
        if (count + 1) % 100 == 0 {
            eprintln!("  fetched {}/{} module records", count + 1, modules.len());
        }
    }

    // Records without a DEFINITION line cannot enter the catalog; drop their
    // metadata so the build does not reject it as orphaned.
    names.retain(|id, _| definitions.contains_key(id));
    classes.retain(|id, _| definitions.contains_key(id));

    Ok((definitions, names, classes))
}

fn default_version_tag() -> String {
    let now = chrono::Local::now();
    format!("KEGG_v{}.{}.{}", now.year(), now.month(), now.day())
}

// ============================================================================
// profile-coverage
// ============================================================================

fn run_profile_coverage(args: ProfileCoverageArgs) -> Result<()> {
    let threads = if args.n_jobs == 0 { num_cpus::get() } else { args.n_jobs };
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();

    let size_in_bytes = fs::metadata(&args.database)
        .with_context(|| format!("Failed to stat catalog: {}", args.database.display()))?
        .len();
    eprintln!("Loading catalog: {} ({} bytes)", args.database.display(), size_in_bytes);
    let catalog = Catalog::load(&args.database)?;
    eprintln!("  Number of pathways: {}", catalog.len());
    eprintln!("  Number of unique KOs: {}", catalog.kos().len());

    eprintln!("Reading query KOs: {}", args.kos.display());
    let genome_to_kos = read_kos(&args.kos, args.name.as_deref())?;
    eprintln!("  {} genome(s), {} threads", genome_to_kos.len(), threads);

    let cancel = AtomicBool::new(false);
    let tables = profile(&genome_to_kos, &catalog, &cancel);

    fs::create_dir_all(&args.output_dir)?;

    let coverage_path = args.output_dir.join("coverage.tsv.gz");
    eprintln!("Writing coverage table: {}", coverage_path.display());
    write_coverage_table(&tables, &args.index_name, &coverage_path)?;

    let step_path = args.output_dir.join("step_coverage.tsv.gz");
    eprintln!("Writing step coverage table: {}", step_path.display());
    write_step_coverage_table(&tables, &args.index_name, &step_path)?;

    Ok(())
}
