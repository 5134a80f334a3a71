use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use frametree_bids::commands;
use frametree_bids::runtime::RealRuntime;

/// frametree-bids - BIDS extension for the FrameTree framework
///
/// Work with datasets organized on the file system according to the Brain
/// Imaging Data Structure (BIDS) convention.
///
/// Examples:
///   frametree-bids --root study init -s 01 -s 02   # Create an empty dataset
///   frametree-bids --root study tree               # Print rows and entries
#[derive(Parser, Debug)]
#[command(author, version = frametree_bids::manifest::version(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Root directory of the dataset (also via FRAMETREE_BIDS_ROOT)
    #[arg(
        long = "root",
        short = 'r',
        env = "FRAMETREE_BIDS_ROOT",
        value_name = "PATH",
        global = true
    )]
    pub root: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Create an empty BIDS dataset
    Init(InitArgs),

    /// Print the data tree: rows and their discovered entries
    Tree,

    /// Show dataset metadata and participants
    Show,

    /// Print the bundled extension manifest
    Info(InfoArgs),
}

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Subject ID (repeatable); the "sub-" prefix may be omitted
    #[arg(long = "subject", short = 's', value_name = "ID", required = true)]
    pub subjects: Vec<String>,

    /// Session ID (repeatable); omit for single-session datasets
    #[arg(long = "session", value_name = "ID")]
    pub sessions: Vec<String>,

    /// Dataset name for dataset_description.json
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Author (repeatable)
    #[arg(long = "author", value_name = "NAME")]
    pub authors: Vec<String>,

    /// Group assignment in the form <subject>=<group> (repeatable)
    #[arg(long = "group", value_name = "SUBJECT=GROUP")]
    pub groups: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct InfoArgs {
    /// Include only the named extra (repeatable)
    #[arg(long = "extra", value_name = "NAME")]
    pub extras: Vec<String>,

    /// Print the resolved dependency set instead of the raw manifest
    #[arg(long)]
    pub resolve: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = RealRuntime;

    match cli.command {
        Commands::Init(args) => commands::init(
            runtime,
            &required_root(cli.root)?,
            &args.subjects,
            &args.sessions,
            args.name.as_deref(),
            &args.authors,
            &args.groups,
        )?,
        Commands::Tree => commands::tree(runtime, &required_root(cli.root)?)?,
        Commands::Show => commands::show(runtime, &required_root(cli.root)?)?,
        Commands::Info(args) => commands::info(&args.extras, args.resolve)?,
    }
    Ok(())
}

fn required_root(root: Option<PathBuf>) -> Result<PathBuf> {
    root.ok_or_else(|| {
        anyhow::anyhow!("A dataset root is required; pass --root or set FRAMETREE_BIDS_ROOT")
    })
}
