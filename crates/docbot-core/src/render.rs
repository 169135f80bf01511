//! Fetching symbol pages and turning a fragment of them into chat markup.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, trace};

use docbot_config::HttpConfig;

use crate::BoxFuture;

/// Errors from rendering a symbol page.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for RenderError {
    fn from(e: reqwest::Error) -> Self {
        RenderError::Network(e.to_string())
    }
}

/// Produces the rendered content for one symbol.
pub trait PageRenderer: Send + Sync {
    /// Render the fragment `fragment_id` of the page at `url`.
    ///
    /// `Ok(None)` means the page was fetched but had nothing to show for the
    /// fragment.
    fn render<'a>(
        &'a self,
        url: &'a str,
        fragment_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, RenderError>>;
}

/// Converts an HTML page fragment to chat-friendly markup.
pub trait FragmentConverter: Send + Sync {
    fn convert(&self, html: &str, fragment_id: &str) -> Result<Option<String>, RenderError>;
}

/// Renders pages fetched over HTTP.
pub struct HttpPageRenderer {
    client: reqwest::Client,
    converter: Arc<dyn FragmentConverter>,
}

impl HttpPageRenderer {
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()?;
        Ok(Self::with_client(client, Arc::new(ExcerptConverter::default())))
    }

    pub fn with_client(client: reqwest::Client, converter: Arc<dyn FragmentConverter>) -> Self {
        Self { client, converter }
    }
}

impl PageRenderer for HttpPageRenderer {
    fn render<'a>(
        &'a self,
        url: &'a str,
        fragment_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, RenderError>> {
        Box::pin(async move {
            debug!(url, fragment_id, "Fetching symbol page");
            let html = self
                .client
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;
            self.converter.convert(&html, fragment_id)
        })
    }
}

// ── Excerpt conversion ──────────────────────────────────────────

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("invalid tag regex"));
static SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)\b.*?</(script|style)>").expect("invalid script regex")
});
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#?[a-zA-Z0-9]+);").expect("invalid entity regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("invalid whitespace regex"));

/// Plain-text excerpt of a Sphinx symbol: its signature as a code block,
/// followed by the start of its description.
#[derive(Debug, Clone)]
pub struct ExcerptConverter {
    max_chars: usize,
}

impl Default for ExcerptConverter {
    fn default() -> Self {
        Self { max_chars: 1000 }
    }
}

impl ExcerptConverter {
    fn excerpt(&self, html: &str, start: usize) -> Option<String> {
        let tag_name: String = html[start + 1..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        let (signature, body) = if tag_name == "dt" {
            let sig_end = find_from(html, start, "</dt>").unwrap_or(html.len());
            let body_end = find_from(html, sig_end, "</dd>").unwrap_or(html.len());
            (clean_text(&html[start..sig_end]), &html[sig_end..body_end])
        } else {
            let body_end = find_from(html, start + 1, "</section>")
                .or_else(|| find_from(html, start + 1, "</body>"))
                .unwrap_or(html.len());
            (String::new(), &html[start..body_end])
        };

        let description = truncate(&clean_text(body), self.max_chars);
        match (signature.is_empty(), description.is_empty()) {
            (true, true) => None,
            (true, false) => Some(description),
            (false, true) => Some(format!("```\n{signature}\n```")),
            (false, false) => Some(format!("```\n{signature}\n```\n{description}")),
        }
    }
}

impl FragmentConverter for ExcerptConverter {
    fn convert(&self, html: &str, fragment_id: &str) -> Result<Option<String>, RenderError> {
        let start = if fragment_id.is_empty() {
            html.find("<h1").or_else(|| html.find("<body"))
        } else {
            find_element_with_id(html, fragment_id)
        };
        let Some(start) = start else {
            trace!(fragment_id, "Fragment not found on page");
            return Ok(None);
        };
        Ok(self.excerpt(html, start))
    }
}

fn find_from(haystack: &str, from: usize, needle: &str) -> Option<usize> {
    haystack.get(from..)?.find(needle).map(|pos| pos + from)
}

/// Byte offset of the `<` opening the element carrying `id`.
fn find_element_with_id(html: &str, id: &str) -> Option<usize> {
    let attr = [format!("id=\"{id}\""), format!("id='{id}'")]
        .into_iter()
        .find_map(|needle| html.find(&needle))?;
    html[..attr].rfind('<')
}

fn clean_text(html: &str) -> String {
    let text = SCRIPT.replace_all(html, " ");
    let text = TAG.replace_all(&text, " ");
    let text = ENTITY.replace_all(&text, |caps: &regex::Captures| {
        decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    let text = text.replace('\u{b6}', "");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

fn decode_entity(name: &str) -> Option<String> {
    let decoded = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "para" => '\u{b6}',
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)?
        }
    };
    Some(decoded.to_string())
}

/// Shorten `text` to at most `max_chars` characters, breaking on whitespace.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    let cut = match cut.rfind(' ') {
        Some(space) if space > 0 => &cut[..space],
        _ => cut.as_str(),
    };
    format!("{cut}...")
}
