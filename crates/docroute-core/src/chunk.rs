//! Heading-aware markdown chunker.
//!
//! Splits one document into [`CandidateRecord`]s that each fit within
//! `max_chunk_chars`, naming every chunk after its place in the heading
//! hierarchy so a chunk is intelligible on its own.
//!
//! # Algorithm
//!
//! 1. Documents at or below `large_file_threshold` characters are emitted
//!    unchanged as a single record named after the document path.
//! 2. The first `# ` line is the document title.
//! 3. The body is split on `## ` lines into `<doc>::<section>` chunks;
//!    text before the first section (minus the title line) is `<doc>::_intro`.
//! 4. A section over budget is split on `### ` lines into
//!    `<doc>::<section>::<subsection>` chunks.
//! 5. Anything still over budget is split greedily on blank-line paragraph
//!    boundaries into `<id>::part1`, `<id>::part2`, ...
//! 6. Chunks of a titled document start with `> <title> > <path>`.
//!
//! Sections whose body (heading line excluded) has fewer than
//! `min_section_chars` non-whitespace-trimmed characters are dropped. If
//! that drops every section of an over-budget document, the whole text is
//! split by paragraph into `<doc>::partN`.
//! Heading detection is line-anchored, so heading-like lines inside fenced
//! code blocks also split.
//!
//! # Example
//!
//! ```rust
//! use docroute_core::chunk::{chunk_document, ChunkParams};
//!
//! let params = ChunkParams::default();
//! let chunks = chunk_document("notes.md", "# Notes\n\nShort file.", &params);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].filename, "notes.md");
//! assert!(chunks[0].parent.is_none());
//! ```

use std::collections::HashSet;

use crate::fingerprint::fingerprint;
use crate::models::{CandidateRecord, PATH_SEPARATOR};

const TITLE_MARKER: &str = "# ";
const SECTION_MARKER: &str = "## ";
const SUBSECTION_MARKER: &str = "### ";
const INTRO: &str = "_intro";
const UNTITLED: &str = "_untitled";

/// Size limits for the chunker, all measured in characters.
#[derive(Debug, Clone)]
pub struct ChunkParams {
    /// Documents at or below this size are never split.
    pub large_file_threshold: usize,
    /// Upper bound for one chunk's content, breadcrumb included.
    pub max_chunk_chars: usize,
    /// Sections with less body text than this are dropped.
    pub min_section_chars: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            large_file_threshold: 50_000,
            max_chunk_chars: 8_000,
            min_section_chars: 10,
        }
    }
}

/// Split one document into chunk records.
///
/// `doc_path` is the document's identifier within its source (usually the
/// path relative to the source root). Unsplit documents keep it as their
/// filename and have no parent; chunks are named `<doc_path>::...` and carry
/// `doc_path` as parent.
///
/// The output is a pure function of the inputs: re-chunking identical text
/// yields identical filenames, contents and fingerprints. At least one
/// record is always returned.
pub fn chunk_document(doc_path: &str, text: &str, params: &ChunkParams) -> Vec<CandidateRecord> {
    if char_len(text) <= params.large_file_threshold {
        return vec![make_record(doc_path.to_string(), text.to_string(), None)];
    }

    let mut chunker = Chunker {
        doc_path,
        title: extract_title(text),
        params,
        used_ids: HashSet::new(),
        emitted: HashSet::new(),
        out: Vec::new(),
    };

    for section in split_on_heading(text, SECTION_MARKER) {
        let section_text = match section.heading {
            Some(_) => section.text.to_string(),
            None => strip_title_line(section.text),
        };
        if body_len(&section_text) < params.min_section_chars {
            continue;
        }
        let name = section_name(section.heading);
        let id = chunker.unique_id(vec![name]);
        chunker.emit_section(&id, &section_text);
    }

    // Every section was too small to keep: split the whole text by
    // paragraph so the result still fits the budget.
    if chunker.out.is_empty() && char_len(text) > params.max_chunk_chars {
        chunker.emit_paragraphs(&[], "", text.trim());
    }
    if chunker.out.is_empty() {
        return vec![make_record(doc_path.to_string(), text.to_string(), None)];
    }
    chunker.out
}

/// Title of a markdown document: the text of its first `# ` line.
pub fn extract_title(text: &str) -> Option<String> {
    text.lines()
        .find(|line| line.starts_with(TITLE_MARKER))
        .map(|line| line[TITLE_MARKER.len()..].trim().to_string())
        .filter(|title| !title.is_empty())
}

struct Chunker<'a> {
    doc_path: &'a str,
    title: Option<String>,
    params: &'a ChunkParams,
    used_ids: HashSet<Vec<String>>,
    emitted: HashSet<String>,
    out: Vec<CandidateRecord>,
}

impl Chunker<'_> {
    fn emit_section(&mut self, path: &[String], text: &str) {
        let body = text.trim();
        let prefix = self.breadcrumb(path);
        if rendered_len(&prefix, body) <= self.params.max_chunk_chars {
            self.push(path, &prefix, body);
            return;
        }

        let subsections = split_on_heading(text, SUBSECTION_MARKER);
        if subsections.iter().all(|s| s.heading.is_none()) {
            self.emit_paragraphs(path, &prefix, body);
            return;
        }

        for sub in subsections {
            if body_len(sub.text) < self.params.min_section_chars {
                continue;
            }
            let mut sub_path = path.to_vec();
            sub_path.push(section_name(sub.heading));
            let sub_path = self.unique_id(sub_path);
            let sub_prefix = self.breadcrumb(&sub_path);
            let sub_body = sub.text.trim();
            if rendered_len(&sub_prefix, sub_body) <= self.params.max_chunk_chars {
                self.push(&sub_path, &sub_prefix, sub_body);
            } else {
                self.emit_paragraphs(&sub_path, &sub_prefix, sub_body);
            }
        }
    }

    /// Greedy paragraph accumulator. A paragraph that alone exceeds the
    /// budget becomes its own part.
    fn emit_paragraphs(&mut self, path: &[String], prefix: &str, body: &str) {
        let overhead = rendered_len(prefix, "");
        let budget = self.params.max_chunk_chars.saturating_sub(overhead);

        let mut parts: Vec<String> = Vec::new();
        let mut acc = String::new();
        let mut acc_len = 0usize;

        for para in paragraphs(body) {
            let para_len = char_len(&para);
            if acc.is_empty() {
                acc = para;
                acc_len = para_len;
                continue;
            }
            if acc_len + 2 + para_len > budget {
                parts.push(std::mem::take(&mut acc));
                acc = para;
                acc_len = para_len;
            } else {
                acc.push_str("\n\n");
                acc.push_str(&para);
                acc_len += 2 + para_len;
            }
        }
        if !acc.is_empty() {
            parts.push(acc);
        }

        if parts.len() == 1 {
            self.push(path, prefix, &parts[0]);
            return;
        }
        for (i, part) in parts.iter().enumerate() {
            let mut part_path = path.to_vec();
            part_path.push(format!("part{}", i + 1));
            self.push(&part_path, prefix, part);
        }
    }

    fn push(&mut self, path: &[String], prefix: &str, body: &str) {
        let mut filename = self.doc_path.to_string();
        for segment in path {
            filename.push_str(PATH_SEPARATOR);
            filename.push_str(segment);
        }
        // A heading containing `::` can collide with generated part names.
        if self.emitted.contains(&filename) {
            let base = filename.clone();
            let mut n = 1;
            while self.emitted.contains(&filename) {
                n += 1;
                filename = format!("{} ({})", base, n);
            }
        }
        self.emitted.insert(filename.clone());
        let content = if prefix.is_empty() {
            body.to_string()
        } else {
            format!("{}\n\n{}", prefix, body)
        };
        self.out.push(make_record(
            filename,
            content,
            Some(self.doc_path.to_string()),
        ));
    }

    fn breadcrumb(&self, path: &[String]) -> String {
        match &self.title {
            Some(title) => format!("> {} > {}", title, path.join(" > ")),
            None => String::new(),
        }
    }

    /// Disambiguate repeated headings under the same parent with ` (2)`, ` (3)`, ...
    fn unique_id(&mut self, mut path: Vec<String>) -> Vec<String> {
        let Some(base) = path.last().cloned() else {
            return path;
        };
        let mut n = 1;
        while self.used_ids.contains(&path) {
            n += 1;
            if let Some(last) = path.last_mut() {
                *last = format!("{} ({})", base, n);
            }
        }
        self.used_ids.insert(path.clone());
        path
    }
}

struct Segment<'a> {
    heading: Option<&'a str>,
    text: &'a str,
}

/// Split `text` at every line starting with `marker`. The heading line stays
/// at the top of its segment; leading text before the first heading is a
/// segment without heading (omitted when empty).
fn split_on_heading<'a>(text: &'a str, marker: &str) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    let mut heading: Option<&'a str> = None;

    for line in text.split_inclusive('\n') {
        if line.starts_with(marker) {
            if offset > start {
                segments.push(Segment {
                    heading,
                    text: &text[start..offset],
                });
            }
            start = offset;
            heading = Some(line[marker.len()..].trim());
        }
        offset += line.len();
    }
    segments.push(Segment {
        heading,
        text: &text[start..],
    });
    segments
}

fn section_name(heading: Option<&str>) -> String {
    match heading {
        Some("") => UNTITLED.to_string(),
        Some(h) => h.to_string(),
        None => INTRO.to_string(),
    }
}

/// Remove the first title line from a leading segment.
fn strip_title_line(text: &str) -> String {
    let mut stripped = false;
    text.split_inclusive('\n')
        .filter(|line| {
            if !stripped && line.starts_with(TITLE_MARKER) {
                stripped = true;
                return false;
            }
            true
        })
        .collect()
}

/// Trimmed length of a segment's body, excluding its heading line.
fn body_len(text: &str) -> usize {
    let trimmed = text.trim_start();
    let body = if trimmed.starts_with('#') {
        trimmed.split_once('\n').map(|(_, rest)| rest).unwrap_or("")
    } else {
        trimmed
    };
    char_len(body.trim())
}

/// Blank-line delimited paragraphs, trimmed, empty ones removed.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n").trim().to_string());
    }
    out.retain(|p| !p.is_empty());
    out
}

fn rendered_len(prefix: &str, body: &str) -> usize {
    if prefix.is_empty() {
        char_len(body)
    } else {
        char_len(prefix) + 2 + char_len(body)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn make_record(filename: String, content: String, parent: Option<String>) -> CandidateRecord {
    let fingerprint = fingerprint(&content);
    CandidateRecord {
        filename,
        content,
        fingerprint,
        parent,
    }
}


#[cfg(test)]
mod properties {
    use super::*;
    use crate::models::family_root;
    use proptest::prelude::*;

    type Section = (String, Vec<String>, Vec<(String, Vec<String>)>);

    fn paragraph() -> impl Strategy<Value = String> {
        prop_oneof![
            4 => "[a-z]{1,9}( [a-zé]{1,9}){0,12}",
            1 => "[a-z]{1,9}( [a-z]{1,9}){0,4}\n[a-z]{1,40}",
            1 => "[a-z┌─]{150,400}",
        ]
    }

    fn heading() -> impl Strategy<Value = String> {
        prop_oneof![
            4 => "[A-Z][a-z]{0,8}",
            1 => Just("Notes".to_string()),
            1 => Just("Notes::part1".to_string()),
            1 => Just(String::new()),
        ]
    }

    fn section() -> impl Strategy<Value = Section> {
        (
            heading(),
            proptest::collection::vec(paragraph(), 0..4),
            proptest::collection::vec((heading(), proptest::collection::vec(paragraph(), 0..4)), 0..3),
        )
    }

    fn render(title: Option<&str>, intro: &[String], sections: &[Section]) -> String {
        let mut text = String::new();
        if let Some(title) = title {
            text.push_str(&format!("# {}\n\n", title));
        }
        for p in intro {
            text.push_str(&format!("{}\n\n", p));
        }
        for (heading, paras, subs) in sections {
            text.push_str(&format!("## {}\n\n", heading));
            for p in paras {
                text.push_str(&format!("{}\n\n", p));
            }
            for (sub, paras) in subs {
                text.push_str(&format!("### {}\n\n", sub));
                for p in paras {
                    text.push_str(&format!("{}\n\n", p));
                }
            }
        }
        text
    }

    prop_compose! {
        fn document()(
            title in proptest::option::of("[A-Z][a-z]{0,12}( [A-Z][a-z]{0,8}){0,3}"),
            intro in proptest::collection::vec(paragraph(), 0..3),
            sections in proptest::collection::vec(section(), 0..6),
        ) -> String {
            render(title.as_deref(), &intro, &sections)
        }
    }

    prop_compose! {
        fn chunk_params()(
            large_file_threshold in 0usize..400,
            max_chunk_chars in 40usize..400,
            min_section_chars in 0usize..15,
        ) -> ChunkParams {
            ChunkParams { large_file_threshold, max_chunk_chars, min_section_chars }
        }
    }

    proptest! {
        #[test]
        fn chunking_is_deterministic(text in document(), p in chunk_params()) {
            prop_assert_eq!(chunk_document("doc.md", &text, &p), chunk_document("doc.md", &text, &p));
        }

        #[test]
        fn chunks_fit_budget_unless_one_paragraph(text in document(), p in chunk_params()) {
            let chunks = chunk_document("doc.md", &text, &p);
            prop_assert!(!chunks.is_empty());
            if char_len(&text) <= p.large_file_threshold {
                prop_assert_eq!(chunks.len(), 1);
                prop_assert_eq!(&chunks[0].content, &text);
                return Ok(());
            }
            let titled = extract_title(&text).is_some();
            for c in &chunks {
                if char_len(&c.content) <= p.max_chunk_chars {
                    continue;
                }
                // Strip the breadcrumb line of titled chunks.
                let body = match c.content.split_once("\n\n") {
                    Some((_, body)) if titled => body,
                    _ => c.content.as_str(),
                };
                prop_assert!(
                    !body.contains("\n\n"),
                    "{} is over budget and holds several paragraphs",
                    c.filename
                );
            }
        }

        #[test]
        fn chunk_filenames_are_unique(text in document(), p in chunk_params()) {
            let chunks = chunk_document("doc.md", &text, &p);
            let mut seen = HashSet::new();
            for c in &chunks {
                prop_assert!(seen.insert(c.filename.clone()), "duplicate filename {}", c.filename);
                prop_assert_eq!(family_root(&c.filename), "doc.md");
                prop_assert_eq!(c.family_root(), "doc.md");
            }
        }
    }
}
