use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "metactl",
    about = "Inspect chained metadata documents",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resolve a key such as `Axes[1].name`
    Get(GetArgs),
    /// List every key visible from a document
    Names(NamesArgs),
}

/// A document plus the chain of documents it inherits from.
#[derive(Args)]
pub struct ChainArgs {
    /// JSON document to query
    pub file: PathBuf,
    /// Defaults documents, nearest ancestor first
    #[arg(short, long = "defaults")]
    pub defaults: Vec<PathBuf>,
}

#[derive(Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub chain: ChainArgs,
    pub key: String,
    /// Text returned when the key does not resolve
    #[arg(long)]
    pub fallback: Option<String>,
}

#[derive(Args)]
pub struct NamesArgs {
    #[command(flatten)]
    pub chain: ChainArgs,
}
