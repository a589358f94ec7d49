use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    epub_ingest::logging::init().context("init logging")?;

    let cli = epub_ingest::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        epub_ingest::cli::Command::Catalog(args) => {
            epub_ingest::catalog::run(args).context("catalog")?;
        }
        epub_ingest::cli::Command::Chapters(args) => {
            epub_ingest::chapters::run(args).await.context("chapters")?;
        }
        epub_ingest::cli::Command::Metadata(args) => {
            epub_ingest::metadata::run(args).await.context("metadata")?;
        }
        epub_ingest::cli::Command::Ingest(args) => {
            epub_ingest::ingest::run(args).await.context("ingest")?;
        }
    }

    Ok(())
}
