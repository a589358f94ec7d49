//! Helpers for the XHTML and XML documents found inside EPUB archives.
//!
//! Sections are parsed as XML with `roxmltree`. Content documents in the wild
//! regularly use HTML named entities (`&nbsp;`, `&eacute;`, ...) that a plain
//! XML parser rejects, so [`normalize_entities`] rewrites them to numeric
//! character references before parsing.

use std::borrow::Cow;

use roxmltree::{Document, Node, ParsingOptions};

/// Parse an XML/XHTML document, allowing a DOCTYPE declaration.
pub fn parse_document(text: &str) -> Result<Document<'_>, roxmltree::Error> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Document::parse_with_options(text, options)
}

/// XML's predefined entities, which the parser already understands.
const XML_ENTITIES: [&str; 5] = ["amp", "lt", "gt", "quot", "apos"];

/// Longest entity name worth looking up; the HTML5 list tops out well below this.
const MAX_ENTITY_NAME: usize = 32;

/// Rewrite HTML named entities (the full HTML5 set) as numeric references.
/// XML's own five entities and unknown names are left untouched.
pub fn normalize_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut changed = false;
    let mut rest = input;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let name_len = after
            .find(';')
            .filter(|&end| end > 0 && end <= MAX_ENTITY_NAME)
            .filter(|&end| after[..end].chars().all(|c| c.is_ascii_alphanumeric()));

        match name_len.and_then(|end| numeric_reference(&after[..end]).map(|r| (end, r))) {
            Some((end, reference)) => {
                out.push_str(&reference);
                rest = &after[end + 1..];
                changed = true;
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);

    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(input)
    }
}

/// `&#N;` form of a known HTML entity name. Some names expand to two code points.
fn numeric_reference(name: &str) -> Option<String> {
    if XML_ENTITIES.contains(&name) {
        return None;
    }
    let entity = format!("&{name};");
    let decoded = html_escape::decode_html_entities(&entity);
    if decoded == entity.as_str() {
        return None;
    }
    Some(decoded.chars().map(|c| format!("&#{};", u32::from(c))).collect())
}

/// Concatenated text of every descendant text node.
pub fn text_content(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn first_descendant<'a, 'input>(
    node: Node<'a, 'input>,
    local_name: &str,
) -> Option<Node<'a, 'input>> {
    node.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == local_name)
}

pub fn child_elements<'a, 'input>(
    node: Node<'a, 'input>,
    local_name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == local_name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Skip,
    Inline,
    Cell,
    LineBreak,
    Block(usize),
    Preformatted,
}

fn layout_of(local_name: &str) -> Layout {
    match local_name {
        "script" | "style" | "template" | "head" | "rp" => Layout::Skip,
        "br" => Layout::LineBreak,
        "td" | "th" => Layout::Cell,
        "pre" => Layout::Preformatted,
        "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "blockquote" | "section" | "article"
        | "header" | "footer" | "aside" | "figure" | "hgroup" | "ul" | "ol" | "dl" | "table"
        | "hr" => Layout::Block(2),
        "div" | "li" | "tr" | "dt" | "dd" | "figcaption" | "caption" | "nav" | "address"
        | "main" | "body" | "thead" | "tbody" | "tfoot" => Layout::Block(1),
        _ => Layout::Inline,
    }
}

/// Render the text of `node` with block boundaries kept as line breaks.
///
/// Whitespace inside text runs collapses the way a browser would render it,
/// except under `<pre>`, which is copied verbatim. Paragraph-level elements are
/// separated by a blank line, other block elements by a single newline.
pub fn render_text(node: Node<'_, '_>) -> String {
    let mut writer = TextWriter::default();
    render_children(node, &mut writer, false);
    writer.finish()
}

fn render_children(node: Node<'_, '_>, writer: &mut TextWriter, preformatted: bool) {
    for child in node.children() {
        if child.is_text() {
            let text = child.text().unwrap_or_default();
            if preformatted {
                writer.push_verbatim(text);
            } else {
                writer.push_text(text);
            }
            continue;
        }
        if !child.is_element() {
            continue;
        }

        match layout_of(child.tag_name().name()) {
            Layout::Skip => {}
            Layout::Inline => render_children(child, writer, preformatted),
            Layout::Cell => {
                render_children(child, writer, preformatted);
                writer.pending_space = true;
            }
            Layout::LineBreak => writer.line_break(),
            Layout::Block(breaks) => {
                writer.block_boundary(breaks);
                render_children(child, writer, preformatted);
                writer.block_boundary(breaks);
            }
            Layout::Preformatted => {
                writer.block_boundary(2);
                render_children(child, writer, true);
                writer.block_boundary(2);
            }
        }
    }
}

// No-break spaces are content, not layout.
fn is_html_whitespace(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\r' | '\x0c')
}

#[derive(Debug, Default)]
struct TextWriter {
    out: String,
    pending_breaks: usize,
    pending_space: bool,
}

impl TextWriter {
    fn flush(&mut self) {
        if self.pending_breaks > 0 {
            if !self.out.is_empty() {
                for _ in 0..self.pending_breaks {
                    self.out.push('\n');
                }
            }
            self.pending_breaks = 0;
            self.pending_space = false;
        } else if self.pending_space {
            if !self.out.is_empty() && !self.out.ends_with('\n') {
                self.out.push(' ');
            }
            self.pending_space = false;
        }
    }

    fn push_text(&mut self, text: &str) {
        for ch in text.chars() {
            if is_html_whitespace(ch) {
                self.pending_space = true;
                continue;
            }
            self.flush();
            self.out.push(ch);
        }
    }

    fn push_verbatim(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.flush();
        self.out.push_str(text);
    }

    fn block_boundary(&mut self, breaks: usize) {
        self.pending_breaks = self.pending_breaks.max(breaks);
    }

    fn line_break(&mut self) {
        self.pending_breaks = (self.pending_breaks + 1).min(2);
    }

    fn finish(self) -> String {
        self.out
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
