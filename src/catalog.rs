use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::cli::CatalogArgs;
use crate::formats::CatalogEntry;

/// Read a catalog listing (`[{"name": ..., "path": ...}]`).
pub fn read_catalog(path: &Path) -> anyhow::Result<Vec<CatalogEntry>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("read catalog: {}", path.display()))?;
    let entries: Vec<CatalogEntry> =
        serde_json::from_str(&contents).context("deserialize catalog")?;
    Ok(entries)
}

/// List the archives in `dir` as catalog entries whose paths start with
/// `prefix`. Hidden files are skipped; entries are sorted by name.
pub fn scan_dir(dir: &Path, prefix: &str) -> anyhow::Result<Vec<CatalogEntry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("read books dir: {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type().context("read entry type")?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }

        let prefix = prefix.trim_end_matches('/');
        entries.push(CatalogEntry {
            path: format!("{prefix}/{name}"),
            name,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

pub fn run(args: CatalogArgs) -> anyhow::Result<()> {
    let dir = PathBuf::from(&args.dir);
    let out_path = PathBuf::from(&args.out);

    if out_path.exists() && !args.force {
        anyhow::bail!("catalog output already exists: {}", out_path.display());
    }

    let entries = scan_dir(&dir, &args.prefix)?;

    let mut out_options = OpenOptions::new();
    out_options.write(true);
    if args.force {
        out_options.create(true).truncate(true);
    } else {
        out_options.create_new(true);
    }
    let mut out = out_options
        .open(&out_path)
        .with_context(|| format!("create catalog: {}", out_path.display()))?;
    serde_json::to_writer_pretty(&mut out, &entries).context("serialize catalog")?;
    out.write_all(b"\n").context("write catalog newline")?;
    out.flush().context("flush catalog")?;

    tracing::info!(entries = entries.len(), out = %out_path.display(), "wrote catalog");
    Ok(())
}
