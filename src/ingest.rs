use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_API_TITLE: &str = "Shaped API v2.0.8";
const DOC_HEADER_DEPTH: usize = 4;
const API_HEADER_DEPTH: usize = 3;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex")
}

static FRONTMATTER: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)\A---\n(.*?)\n---\n"));
static FIRST_H1: LazyLock<Regex> = LazyLock::new(|| re(r"(?m)^#\s+(.+)$"));
static TAB_VALUES: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)values=\{\[\s*(.*?)\s*\]\}"));
static TAB_LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"(?s)\{\s*label:\s*["']([^"']+)["']\s*,\s*value:\s*["']([^"']+)["']\s*\}"#)
});
static TAB_VALUE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"(?s)\{\s*value:\s*["']([^"']+)["']\s*,\s*label:\s*["']([^"']+)["']\s*\}"#)
});
static TAB_ITEM: LazyLock<Regex> =
    LazyLock::new(|| re(r#"(?s)<TabItem\s+value=["']([^"']+)["']\s*>(.*?)</TabItem>"#));
static IMAGES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?s)<\w+Svg[^>]*>.*?</\w+Svg>",
        r"<\w+Svg[^>]*/>",
        r"<ThemedSvg[^>]*>",
        r"<Image[^>]*>",
        r"<img[^>]*/?>",
        r"!\[.*?\]\([^)]+\)",
    ]
    .into_iter()
    .map(re)
    .collect()
});
static CARD: LazyLock<Regex> = LazyLock::new(|| re(r"<Card[^>]*/?>"));
static CARD_TITLE: LazyLock<Regex> = LazyLock::new(|| re(r#"title=["']([^"']+)["']"#));
static CARD_DESCRIPTION: LazyLock<Regex> = LazyLock::new(|| re(r#"description=["']([^"']+)["']"#));
// applied in order; the bare `:::` closer must come after the callout openers
static ARTIFACTS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"//highlight-start\n?", ""),
        (r"//highlight-end\n?", ""),
        (r"//highlight-next-line\n?", ""),
        (r":::tip\n?", "\n**Tip:** "),
        (r":::note\n?", "\n**Note:** "),
        (r":::warning\n?", "\n**Warning:** "),
        (r":::info\n?", "\n**Info:** "),
        (r":::\n?", "\n"),
        (r"</?section[^>]*>", ""),
        (r"</?article[^>]*>", ""),
        (r"</?div[^>]*>", ""),
    ]
    .into_iter()
    .map(|(pattern, with)| (re(pattern), with))
    .collect()
});
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| re(r"\n{3,}"));
static HTML_HEADINGS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    (1..=4)
        .map(|level| (re(&format!(r"(?is)<h{level}[^>]*>(.*?)</h{level}>")), &"####"[..level]))
        .collect()
});
static ENDPOINT: LazyLock<Regex> = LazyLock::new(|| re(r"`(GET|POST|PATCH|DELETE|PUT)\s+([^\s`]+)`"));

fn split_frontmatter(raw: &str) -> (HashMap<String, String>, &str) {
    let Some(caps) = FRONTMATTER.captures(raw) else {
        return (HashMap::new(), raw);
    };
    let fields = caps[1]
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_string(), value.to_string())
        })
        .collect();
    let body_start = caps.get(0).map_or(0, |m| m.end());
    (fields, &raw[body_start..])
}

fn first_h1(content: &str) -> Option<String> {
    FIRST_H1.captures(content).map(|c| c[1].trim().to_string())
}

fn remove_imports(content: &str) -> String {
    content
        .split('\n')
        .filter(|line| !line.trim().starts_with("import "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn tab_labels(block: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    if let Some(values) = TAB_VALUES.captures(block) {
        for c in TAB_LABEL_VALUE.captures_iter(&values[1]) {
            labels.insert(c[2].to_string(), c[1].to_string());
        }
        for c in TAB_VALUE_LABEL.captures_iter(&values[1]) {
            labels.insert(c[1].to_string(), c[2].to_string());
        }
    }
    labels
}

/// Each `<TabItem>` becomes a `###` section titled by its tab label.
fn flatten_tabs(mut content: String) -> String {
    const CLOSE: &str = "</Tabs>";
    while let Some(start) = content.find("<Tabs") {
        let Some(len) = content[start..].find(CLOSE) else {
            break;
        };
        let end = start + len + CLOSE.len();
        let block = &content[start..end];
        let labels = tab_labels(block);
        let sections: Vec<String> = TAB_ITEM
            .captures_iter(block)
            .map(|c| {
                let label = labels.get(&c[1]).cloned().unwrap_or_else(|| capitalize(&c[1]));
                format!("\n### {label}\n{}\n", c[2].trim())
            })
            .collect();
        content.replace_range(start..end, &sections.join("\n"));
    }
    content
}

fn remove_images(content: &str) -> String {
    IMAGES
        .iter()
        .fold(content.to_string(), |acc, image| image.replace_all(&acc, "").into_owned())
}

fn replace_cards(content: &str) -> String {
    CARD.replace_all(content, |card: &Captures| {
        let tag = &card[0];
        let mut out = Vec::new();
        if let Some(title) = CARD_TITLE.captures(tag) {
            out.push(format!("#### {}", &title[1]));
        }
        if let Some(description) = CARD_DESCRIPTION.captures(tag) {
            out.push(description[1].to_string());
        }
        out.join("\n")
    })
    .into_owned()
}

fn clean_artifacts(content: &str) -> String {
    let cleaned = ARTIFACTS
        .iter()
        .fold(content.to_string(), |acc, (pattern, with)| pattern.replace_all(&acc, *with).into_owned());
    BLANK_RUNS.replace_all(&cleaned, "\n\n").into_owned()
}

/// MDX page to plain markdown plus its document title.
pub fn preprocess_doc(raw: &str) -> (String, String) {
    let (frontmatter, body) = split_frontmatter(raw);
    let mut title = frontmatter.get("title").cloned().unwrap_or_default();
    let mut content = body.to_string();
    if !title.is_empty() && !content.trim().starts_with('#') {
        content = format!("# {title}\n\n{content}");
    }
    if title.is_empty() {
        title = first_h1(&content).unwrap_or_default();
    }

    let content = remove_imports(&content);
    let content = flatten_tabs(content);
    let content = remove_images(&content);
    let content = replace_cards(&content);
    let content = clean_artifacts(&content);
    (content.trim().to_string(), title)
}

pub fn preprocess_api(raw: &str) -> (String, String) {
    let (frontmatter, body) = split_frontmatter(raw);
    let mut title = frontmatter.get("title").cloned().unwrap_or_else(|| DEFAULT_API_TITLE.into());
    let content = HTML_HEADINGS.iter().fold(body.to_string(), |acc, (heading, hashes)| {
        heading
            .replace_all(&acc, |c: &Captures| format!("{hashes} {}", c[1].trim()))
            .into_owned()
    });
    if title.is_empty() {
        title = first_h1(&content).unwrap_or_default();
    }
    let content = BLANK_RUNS.replace_all(&content, "\n\n");
    (content.trim().to_string(), title)
}

/// Headings in force for a section, keyed by level.
pub type Headings = BTreeMap<usize, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub headings: Headings,
    pub content: String,
}

fn heading_level(line: &str, max_level: usize) -> Option<usize> {
    (1..=max_level).rev().find(|&level| {
        line.starts_with(&"####"[..level]) && line.as_bytes().get(level).is_none_or(|b| *b == b' ')
    })
}

/// Splits markdown at headings up to `max_level`, keeping heading lines in
/// the content. Lines inside fenced code never start a section.
pub fn split_by_headers(content: &str, max_level: usize) -> Vec<Section> {
    let mut blocks = Vec::new();
    let mut lines: Vec<&str> = Vec::new();
    let mut active = Headings::new();
    let mut current = Headings::new();
    let mut fence: Option<&str> = None;

    let mut flush = |lines: &mut Vec<&str>, headings: &Headings| {
        if !lines.is_empty() {
            blocks.push(Section { headings: headings.clone(), content: lines.join("\n") });
            lines.clear();
        }
    };

    for raw in content.split('\n') {
        let line = raw.trim();
        match fence {
            None if line.starts_with("```") && line.matches("```").count() == 1 => fence = Some("```"),
            None if line.starts_with("~~~") => fence = Some("~~~"),
            Some(open) if line.starts_with(open) => fence = None,
            _ => {}
        }
        if fence.is_some() {
            lines.push(line);
            continue;
        }

        if let Some(level) = heading_level(line, max_level) {
            active.retain(|l, _| *l < level);
            active.insert(level, line[level..].trim().to_string());
            flush(&mut lines, &current);
            lines.push(line);
        } else if !line.is_empty() {
            lines.push(line);
        } else {
            flush(&mut lines, &current);
        }
        current = active.clone();
    }
    flush(&mut lines, &current);
    merge_blocks(blocks)
}

// Paragraphs under the same headings are joined; a heading-only block is
// absorbed by the deeper section that follows it.
fn merge_blocks(blocks: Vec<Section>) -> Vec<Section> {
    let mut out: Vec<Section> = Vec::new();
    for block in blocks {
        match out.last_mut() {
            Some(last) if mergeable(last, &block) => {
                last.content.push_str("  \n");
                last.content.push_str(&block.content);
                last.headings = block.headings;
            }
            _ => out.push(block),
        }
    }
    out
}

fn mergeable(last: &Section, next: &Section) -> bool {
    last.headings == next.headings
        || (last.headings.len() < next.headings.len()
            && last.content.lines().last().is_some_and(|l| l.starts_with('#')))
}

fn chunk_id(file_path: &str, index: usize) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, format!("{file_path}:{index}").as_bytes())
}

fn heading(headings: &Headings, level: usize) -> String {
    headings.get(&level).cloned().unwrap_or_default()
}

/// One row of the documentation table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocChunk {
    pub id: Uuid,
    pub name: String,
    pub content: String,
    pub document_title: String,
    pub h1: String,
    pub h2: String,
    pub h3: String,
    pub h4: String,
    pub file_path: String,
    pub absolute_path: String,
    pub chunk_metadata: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn doc_chunks(file_path: &str, absolute_path: &str, raw: &str, now: DateTime<Utc>) -> Vec<DocChunk> {
    let (content, title) = preprocess_doc(raw);
    let name = if title.is_empty() {
        Path::new(file_path).file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
    } else {
        title.clone()
    };
    split_by_headers(&content, DOC_HEADER_DEPTH)
        .into_iter()
        .enumerate()
        .map(|(index, section)| {
            let metadata: Map<String, Value> = section
                .headings
                .iter()
                .map(|(level, text)| (format!("Header {level}"), Value::String(text.clone())))
                .collect();
            DocChunk {
                id: chunk_id(file_path, index),
                name: name.clone(),
                content: section.content.trim().to_string(),
                document_title: title.clone(),
                h1: heading(&section.headings, 1),
                h2: heading(&section.headings, 2),
                h3: heading(&section.headings, 3),
                h4: heading(&section.headings, 4),
                file_path: file_path.to_string(),
                absolute_path: absolute_path.to_string(),
                chunk_metadata: Value::Object(metadata).to_string(),
                created_at: now,
                updated_at: now,
            }
        })
        .collect()
}

/// One row of the API reference table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiChunk {
    pub id: Uuid,
    pub name: String,
    pub content: String,
    pub document_title: String,
    pub api_section: String,
    pub endpoint_name: String,
    pub subsection: String,
    pub http_method: String,
    pub endpoint_path: String,
    pub file_path: String,
    pub chunk_index: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn api_chunks(file_path: &str, raw: &str, now: DateTime<Utc>) -> Vec<ApiChunk> {
    let (content, title) = preprocess_api(raw);
    split_by_headers(&content, API_HEADER_DEPTH)
        .into_iter()
        .enumerate()
        .map(|(index, section)| {
            let content = section.content.trim().to_string();
            let (http_method, endpoint_path) = ENDPOINT
                .captures(&content)
                .map(|c| (c[1].to_string(), c[2].to_string()))
                .unwrap_or_default();
            let api_section = heading(&section.headings, 1);
            let endpoint_name = heading(&section.headings, 2);
            let name = [&endpoint_name, &api_section, &title]
                .into_iter()
                .find(|s| !s.is_empty())
                .cloned()
                .unwrap_or_default();
            ApiChunk {
                id: chunk_id(file_path, index),
                name,
                content,
                document_title: title.clone(),
                api_section,
                endpoint_name,
                subsection: heading(&section.headings, 3),
                http_method,
                endpoint_path,
                file_path: file_path.to_string(),
                chunk_index: index,
                created_at: now,
                updated_at: now,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSummary {
    pub files: usize,
    pub failed: usize,
    pub chunks: usize,
}

fn write_jsonl<T: Serialize>(out: &Path, rows: &[T]) -> anyhow::Result<()> {
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = fs::File::create(out).with_context(|| format!("creating {}", out.display()))?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

fn is_markdown(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("md" | "mdx"))
}

/// Walks `docs_dir` for `.md`/`.mdx` pages and writes the documentation table.
/// Unreadable files are logged and counted, not fatal.
pub fn load_documentation(docs_dir: &Path, out: &Path) -> anyhow::Result<LoadSummary> {
    if !docs_dir.is_dir() {
        anyhow::bail!("documentation directory not found: {}", docs_dir.display());
    }
    let mut files: Vec<PathBuf> = WalkBuilder::new(docs_dir)
        .hidden(false)
        .git_ignore(true)
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.into_path()),
            Err(e) => {
                warn!(error = %e, "skipping directory entry");
                None
            }
        })
        .filter(|path| path.is_file() && is_markdown(path))
        .collect();
    files.sort();

    let now = Utc::now();
    let mut summary = LoadSummary::default();
    let mut rows = Vec::new();
    for path in &files {
        let relative = path.strip_prefix(docs_dir).unwrap_or(path).to_string_lossy().replace('\\', "/");
        match fs::read_to_string(path) {
            Ok(raw) => {
                let chunks = doc_chunks(&relative, &path.to_string_lossy(), &raw, now);
                summary.files += 1;
                summary.chunks += chunks.len();
                rows.extend(chunks);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read documentation page");
                summary.failed += 1;
            }
        }
    }
    write_jsonl(out, &rows)?;
    info!(
        files = summary.files,
        failed = summary.failed,
        chunks = summary.chunks,
        out = %out.display(),
        "documentation table written"
    );
    Ok(summary)
}

pub fn load_api_docs(file: &Path, out: &Path) -> anyhow::Result<LoadSummary> {
    let raw = fs::read_to_string(file).with_context(|| format!("API docs file not found: {}", file.display()))?;
    let file_path = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let rows = api_chunks(&file_path, &raw, Utc::now());
    write_jsonl(out, &rows)?;
    info!(chunks = rows.len(), out = %out.display(), "API reference table written");
    Ok(LoadSummary { files: 1, failed: 0, chunks: rows.len() })
}
