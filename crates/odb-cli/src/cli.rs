use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "odb",
    about = "Inspect and populate a content-addressed object database",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Repository directory
    #[arg(long, global = true, default_value = ".git")]
    pub git_dir: PathBuf,

    /// TOML configuration file; overrides --git-dir
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an empty repository layout
    Init,
    /// Compute an object id, optionally writing the object
    HashObject(HashObjectArgs),
    /// Print an object's type, size or content
    CatFile(CatFileArgs),
    /// Show where and how an object is stored
    Info(InfoArgs),
    /// Count loose and packed objects
    CountObjects,
    /// List packs in search order
    Packs,
    /// List or add alternate object directories
    Alternates(AlternatesArgs),
    /// Create a replace ref
    Replace(ReplaceArgs),
    /// Walk commit history from a starting commit
    RevList(RevListArgs),
}

#[derive(Args)]
pub struct HashObjectArgs {
    pub file: PathBuf,
    #[arg(short = 't', long = "type", default_value = "blob")]
    pub kind: String,
    /// Write the object into the database
    #[arg(short, long)]
    pub write: bool,
}

#[derive(Args)]
pub struct CatFileArgs {
    pub object: String,
    /// Show the object type
    #[arg(short = 't', conflicts_with_all = ["size", "pretty"])]
    pub kind: bool,
    /// Show the object size
    #[arg(short = 's', conflicts_with = "pretty")]
    pub size: bool,
    /// Pretty-print the content
    #[arg(short = 'p')]
    pub pretty: bool,
    /// Read the object itself even if a replacement exists
    #[arg(long)]
    pub no_replace: bool,
    #[arg(long)]
    pub allow_unknown_type: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    pub object: String,
    #[arg(long)]
    pub no_replace: bool,
    /// Do not rescan packs when the object is not found
    #[arg(long)]
    pub quick: bool,
}

#[derive(Args)]
pub struct AlternatesArgs {
    #[command(subcommand)]
    pub action: Option<AlternatesAction>,
}

#[derive(Subcommand)]
pub enum AlternatesAction {
    /// Append a directory to info/alternates
    Add { dir: PathBuf },
}

#[derive(Args)]
pub struct ReplaceArgs {
    pub original: String,
    pub replacement: String,
    /// Overwrite an existing replace ref
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args)]
pub struct RevListArgs {
    pub commit: String,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    /// Print allocator statistics after the walk
    #[arg(long)]
    pub alloc_stats: bool,
}
