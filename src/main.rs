use clap::{Args, Parser, Subcommand, ValueEnum};
use phylo_project::io::create_writer;
use phylo_project::snapshot::SNAPSHOT_FILE_NAME;
use phylo_project::{Datatype, Frequencies, NodeType, Project, ProjectConfig, ReadOptions, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Manage a phylogenetics project directory: load sequences, infer a tree
/// with PhyML and reconstruct ancestors with PAML codeml.
#[derive(Parser, Debug)]
#[command(name = "phylo-project", version, about = "Sequence table + tree + ancestor orchestration")]
struct Cli {
    /// JSON file with tool locations and default options
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Quiet mode: only errors are reported
    #[arg(short = 'q', long = "quiet", global = true, default_value_t = false)]
    quiet: bool,

    /// Verbose mode: also report command lines and tool output
    #[arg(short = 'v', long = "verbose", global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a project directory with an empty table
    Init {
        dir: PathBuf,
        /// Accept an existing directory
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Replace the table with the contents of a file
    Read {
        dir: PathBuf,
        path: PathBuf,
        /// Parser to use: fasta | newick | phylip | csv | tsv
        #[arg(long)]
        schema: String,
        /// Parser option, repeatable
        #[arg(short = 'o', long = "option", value_parser = parse_key_val)]
        options: Vec<(String, String)>,
    },
    /// Infer a tree from the table's sequences and merge it in
    Tree(TreeArgs),
    /// Reconstruct ancestral sequences on the current tree
    Reconstruct(ReconstructArgs),
    /// Write the table as CSV (`.gz` compresses)
    Export {
        dir: PathBuf,
        #[arg(long = "output")]
        output: PathBuf,
    },
    /// Summarise the table
    Show { dir: PathBuf },
}

#[derive(Args, Debug)]
struct TreeArgs {
    dir: PathBuf,
    #[arg(long, value_enum)]
    datatype: Option<DatatypeArg>,
    /// Bootstrap replicates (-1 disables)
    #[arg(long, allow_negative_numbers = true)]
    bootstrap: Option<i64>,
    /// Substitution model
    #[arg(long)]
    model: Option<String>,
    #[arg(long, value_enum)]
    frequencies: Option<FrequenciesArg>,
    /// Raw PhyML option, repeatable; wins over the named flags
    #[arg(short = 'o', long = "option", value_parser = parse_key_val)]
    options: Vec<(String, String)>,
}

#[derive(Args, Debug)]
struct ReconstructArgs {
    dir: PathBuf,
    #[arg(long = "id-col")]
    id_col: Option<String>,
    #[arg(long = "sequence-col")]
    sequence_col: Option<String>,
    #[arg(long = "altall-cutoff")]
    altall_cutoff: Option<f64>,
    /// Rate matrix name, e.g. lg, wag, jones
    #[arg(long = "rate-file")]
    rate_file: Option<String>,
    /// Raw codeml control entry, repeatable
    #[arg(short = 'o', long = "option", value_parser = parse_key_val)]
    options: Vec<(String, String)>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DatatypeArg { Aa, Nt }

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FrequenciesArg { Empirical, Model }

impl From<DatatypeArg> for Datatype {
    fn from(arg: DatatypeArg) -> Self {
        match arg {
            DatatypeArg::Aa => Datatype::Aa,
            DatatypeArg::Nt => Datatype::Nt,
        }
    }
}

impl From<FrequenciesArg> for Frequencies {
    fn from(arg: FrequenciesArg) -> Self {
        match arg {
            FrequenciesArg::Empirical => Frequencies::Empirical,
            FrequenciesArg::Model => Frequencies::Model,
        }
    }
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);
    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise `--quiet` / `--verbose` pick the level.
fn init_logging(quiet: bool, verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ProjectConfig::from_json_file(path)?,
        None => ProjectConfig::default(),
    };
    let t0 = Instant::now();

    match cli.command {
        Command::Init { dir, overwrite } => {
            let project = Project::create(&dir, overwrite)?;
            project.save_snapshot(project.snapshot_path())?;
        }
        Command::Read { dir, path, schema, options } => {
            let mut project = load(&dir)?;
            let options: ReadOptions = options.into_iter().collect();
            project.read_data(&path, &schema, &options)?;
            project.save_snapshot(project.snapshot_path())?;
        }
        Command::Tree(args) => {
            let mut project = load(&args.dir)?;
            let mut options = config.tree.clone();
            if let Some(datatype) = args.datatype {
                options.datatype = datatype.into();
            }
            if let Some(bootstrap) = args.bootstrap {
                options.bootstrap = bootstrap;
            }
            if let Some(model) = args.model {
                options.model = model;
            }
            if let Some(frequencies) = args.frequencies {
                options.frequencies = frequencies.into();
            }
            options.extra.extend(args.options);
            project.compute_tree(&config.phyml_runner(), &options)?;
            project.save_snapshot(project.snapshot_path())?;
        }
        Command::Reconstruct(args) => {
            let mut project = load(&args.dir)?;
            let mut params = config.reconstruction.clone();
            if let Some(id_col) = args.id_col {
                params.id_column = id_col;
            }
            if let Some(sequence_col) = args.sequence_col {
                params.sequence_column = sequence_col;
            }
            if let Some(cutoff) = args.altall_cutoff {
                params.altall_cutoff = cutoff;
            }
            if let Some(rate_file) = args.rate_file {
                params.rate_file = rate_file;
            }
            params.extra.extend(args.options);
            project.compute_reconstruction(&config.codeml_runner(), &params)?;
            project.save_snapshot(project.snapshot_path())?;
        }
        Command::Export { dir, output } => {
            load(&dir)?.export_csv(&output)?;
        }
        Command::Show { dir } => {
            show(&load(&dir)?)?;
        }
    }

    info!("Done in {:.3}s", t0.elapsed().as_secs_f64());
    Ok(())
}

fn load(dir: &Path) -> Result<Project> {
    Project::load_snapshot(dir.join(SNAPSHOT_FILE_NAME))
}

fn show(project: &Project) -> Result<()> {
    let table = project.table();
    let mut out = create_writer("-")?;
    writeln!(out, "directory\t{}", project.directory().display())?;
    writeln!(out, "rows\t{}", table.len())?;
    for node_type in [NodeType::Root, NodeType::Node, NodeType::Leaf, NodeType::Altall] {
        writeln!(out, "{node_type}\t{}", table.count_type(node_type))?;
    }
    let untyped = table.iter().filter(|r| r.node_type.is_none()).count();
    writeln!(out, "untyped\t{untyped}")?;
    out.flush()?;
    Ok(())
}
