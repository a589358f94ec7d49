use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::task::JoinSet;

use crate::cli::ChaptersArgs;
use crate::container::{Publication, SectionSource};
use crate::formats::Chapter;
use crate::xhtml;

/// Front and back matter that never yields a chapter.
pub const BOILERPLATE_SECTIONS: &[&str] = &[
    "titlepage.xhtml",
    "imprint.xhtml",
    "dedication.xhtml",
    "preface.xhtml",
    "halftitlepage.xhtml",
    "endnotes.xhtml",
    "colophon.xhtml",
    "uncopyright.xhtml",
];

const HEADING_LEVELS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];

pub fn is_boilerplate(href: &str) -> bool {
    let path = href.split('#').next().unwrap_or_default();
    let file_name = path.rsplit('/').next().unwrap_or(path);
    BOILERPLATE_SECTIONS
        .iter()
        .any(|entry| *entry == path || *entry == file_name)
}

/// Load every non-boilerplate spine section concurrently and return the
/// non-empty chapters in spine order.
pub async fn extract_chapters<S>(source: Arc<S>) -> Vec<Chapter>
where
    S: SectionSource + ?Sized + 'static,
{
    let hrefs = source
        .spine_hrefs()
        .into_iter()
        .filter(|href| {
            let skip = is_boilerplate(href);
            if skip {
                tracing::debug!(href = %href, "skipping boilerplate section");
            }
            !skip
        })
        .collect::<Vec<_>>();

    let mut slots: Vec<Option<Chapter>> = vec![None; hrefs.len()];
    let mut loads = JoinSet::new();
    for (idx, href) in hrefs.into_iter().enumerate() {
        let source = Arc::clone(&source);
        loads.spawn(async move {
            let chapter = match source.load_section(&href).await {
                Ok(text) => chapter_from_section(&href, &text),
                Err(err) => {
                    tracing::warn!(href = %href, ?err, "section load failed; treating as empty");
                    None
                }
            };
            (idx, chapter)
        });
    }

    while let Some(joined) = loads.join_next().await {
        match joined {
            Ok((idx, chapter)) => slots[idx] = chapter,
            Err(err) => tracing::warn!(?err, "section task did not complete"),
        }
    }

    slots.into_iter().flatten().collect()
}

pub async fn run(args: ChaptersArgs) -> anyhow::Result<()> {
    let epub_path = PathBuf::from(&args.epub);
    let bytes = tokio::fs::read(&epub_path)
        .await
        .with_context(|| format!("read epub: {}", epub_path.display()))?;
    let publication = Publication::open(bytes)
        .await
        .with_context(|| format!("open epub: {}", epub_path.display()))?;

    let chapters = extract_chapters(Arc::new(publication)).await;
    tracing::info!(chapters = chapters.len(), "extracted chapters");

    let json = serde_json::to_string_pretty(&chapters).context("serialize chapters")?;
    match &args.out {
        Some(out) => tokio::fs::write(out, format!("{json}\n"))
            .await
            .with_context(|| format!("write chapters: {out}"))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}").context("write chapters to stdout")?;
        }
    }
    Ok(())
}

/// `None` when the section is not a document with a body or renders no text.
pub fn chapter_from_section(href: &str, text: &str) -> Option<Chapter> {
    match parse_section(href, text) {
        Ok(chapter) => chapter,
        Err(err) => {
            tracing::warn!(href, ?err, "section is not a structured document");
            None
        }
    }
}

fn parse_section(href: &str, text: &str) -> anyhow::Result<Option<Chapter>> {
    let normalized = xhtml::normalize_entities(text);
    let doc = xhtml::parse_document(&normalized).context("parse section xhtml")?;
    let Some(body) = xhtml::first_descendant(doc.root_element(), "body") else {
        return Ok(None);
    };

    let content = xhtml::render_text(body);
    let content = content.trim();
    if content.is_empty() {
        return Ok(None);
    }

    let title = HEADING_LEVELS
        .iter()
        .find_map(|level| xhtml::first_descendant(body, level))
        .map(|heading| xhtml::text_content(heading).trim().to_owned())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| href.to_owned());

    Ok(Some(Chapter {
        title,
        content: content.to_owned(),
    }))
}
