use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde_json::{json, Value};
use tracing::{debug, error};
use url::Url;

use super::{str_arg, Tool, ToolContext, ToolFuture, ToolOutput};
use crate::error::FetchError;

static SUMMARY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p.post_summary").expect("valid selector"));
static RICH_TEXT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".post_content .post_rich-text").expect("valid selector"));
static BLOCKS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("p, ul, ol, h1, h2, h3, h4, h5, h6, li").expect("valid selector")
});

/// Readable text of a blog post: the summary paragraphs, then every block
/// element of the rich-text body, one per paragraph.
pub fn extract_page_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut parts: Vec<String> = Vec::new();
    let mut push = |text: String| {
        let text = text.trim();
        if !text.is_empty() {
            parts.push(text.to_string());
        }
    };

    for el in doc.select(&SUMMARY) {
        push(el.text().collect());
    }
    for body in doc.select(&RICH_TEXT) {
        for el in body.select(&BLOCKS) {
            push(el.text().collect());
        }
    }
    parts.join("\n\n")
}

pub async fn fetch_page_text(http: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url} ({e})")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl(format!("{url} (only http and https are supported)")));
    }

    let resp = http.get(parsed).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
        });
    }
    let html = resp.text().await?;
    let text = extract_page_text(&html);
    debug!(url, html_bytes = html.len(), text_bytes = text.len(), "page extracted");
    Ok(text)
}

pub struct ReadWebpageTool;

impl Tool for ReadWebpageTool {
    fn name(&self) -> &'static str {
        "read_webpage"
    }

    fn description(&self) -> &'static str {
        "Fetch and extract content from a URL on the blog. \
         Only use this tool with a fully described HTTP or HTTPS url. \
         Do not use this tool if you have a file path, such as /lib/doc.md"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The full URL of the blog post to read" }
            },
            "required": ["url"]
        })
    }

    fn run<'a>(&'a self, ctx: ToolContext<'a>, args: Value) -> ToolFuture<'a> {
        Box::pin(async move {
            let Some(url) = str_arg(&args, "url") else {
                return ToolOutput::error("Error: missing url");
            };
            match fetch_page_text(ctx.http, url).await {
                Ok(text) => ToolOutput::ok(text),
                Err(e) => {
                    error!(url, error = %e, "could not read webpage");
                    ToolOutput::error(format!("Error: Could not fetch content from {url}. {e}"))
                }
            }
        })
    }
}
