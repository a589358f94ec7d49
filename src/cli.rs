use clap::{Args, Parser, Subcommand};

use crate::ingest::{DEFAULT_COVERS_BUCKET, DEFAULT_FILES_BUCKET};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Catalog(CatalogArgs),
    Chapters(ChaptersArgs),
    Metadata(MetadataArgs),
    Ingest(IngestArgs),
}

#[derive(Debug, Args)]
pub struct CatalogArgs {
    /// Directory holding the EPUB archives.
    #[arg(long)]
    pub dir: String,

    /// Path prefix written in front of each file name.
    #[arg(long, default_value = "/books")]
    pub prefix: String,

    /// Output file path for the catalog listing (`booksList.json`).
    #[arg(long)]
    pub out: String,

    /// Overwrite an existing listing.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct ChaptersArgs {
    /// EPUB file to read.
    #[arg(long)]
    pub epub: String,

    /// Write chapters as JSON to this file instead of stdout.
    #[arg(long)]
    pub out: Option<String>,
}

#[derive(Debug, Args)]
pub struct MetadataArgs {
    /// EPUB file to read.
    #[arg(long)]
    pub epub: String,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Catalog listing (`[{"name", "path"}]`).
    #[arg(long)]
    pub catalog: String,

    /// Local directory that catalog paths are relative to.
    #[arg(long, conflicts_with = "base_url", required_unless_present = "base_url")]
    pub root: Option<String>,

    /// Base URL that catalog paths are fetched from.
    #[arg(long)]
    pub base_url: Option<String>,

    /// Output directory for the local store backend.
    #[arg(long, default_value = "ingest-out")]
    pub out: String,

    /// Public URL prefix for objects in the local store backend.
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Bucket receiving cover images.
    #[arg(long, default_value = DEFAULT_COVERS_BUCKET)]
    pub covers_bucket: String,

    /// Bucket receiving archive copies.
    #[arg(long, default_value = DEFAULT_FILES_BUCKET)]
    pub files_bucket: String,

    /// Table receiving book records.
    #[arg(long, default_value = "books")]
    pub table: String,

    /// Directory receiving extracted chapters as JSON, one file per book.
    #[arg(long)]
    pub chapters_out: Option<String>,

    /// Write per-entry outcomes as JSON to this file.
    #[arg(long)]
    pub report: Option<String>,

    /// Exit with failure when any entry failed.
    #[arg(long, default_value_t = false)]
    pub fail_on_error: bool,
}
