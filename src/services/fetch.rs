use chrono::{DateTime, Utc};
use scraper::{Html, Node};
use std::time::Duration;

/// Outcome of fetching one cited page. Unfetchable pages are a degraded
/// result, not an error: the task continues with zero evidence candidates.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status_code: i32,
    pub text: Option<String>,
    pub error_message: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// HTTP client for reference pages.
pub struct PageFetcher {
    http: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to build fetch client: {0}")]
    Client(#[from] reqwest::Error),
}

impl PageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; ClaimVerifyBot/1.0)")
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    /// Fetch a reference page and reduce it to cleaned text.
    ///
    /// Transport failures and non-200 statuses produce a [`FetchedPage`]
    /// without text; they never fail the surrounding task.
    pub async fn fetch(&self, url: &str) -> FetchedPage {
        let fetched_at = Utc::now();

        let response = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Reference page fetch failed");
                return FetchedPage {
                    status_code: 0,
                    text: None,
                    error_message: Some(format!("fetch failed: {e}")),
                    fetched_at,
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %url, status = status.as_u16(), "Reference page returned non-success status");
            return FetchedPage {
                status_code: i32::from(status.as_u16()),
                text: None,
                error_message: Some(format!("HTTP status {}", status.as_u16())),
                fetched_at,
            };
        }

        match response.text().await {
            Ok(body) => {
                let text = html_to_text(&body);
                FetchedPage {
                    status_code: i32::from(status.as_u16()),
                    text: if text.is_empty() { None } else { Some(text) },
                    error_message: None,
                    fetched_at,
                }
            }
            Err(e) => FetchedPage {
                status_code: i32::from(status.as_u16()),
                text: None,
                error_message: Some(format!("body read failed: {e}")),
                fetched_at,
            },
        }
    }
}

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "head", "template"];

/// Extract visible text from an HTML document, skipping non-content
/// elements and collapsing whitespace.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    let mut skip_depth: usize = 0;

    for edge in document.tree.root().traverse() {
        use ego_tree::iter::Edge;
        match edge {
            Edge::Open(node) => match node.value() {
                Node::Element(el) if SKIPPED_ELEMENTS.contains(&el.name()) => skip_depth += 1,
                Node::Text(t) if skip_depth == 0 => {
                    raw.push_str(&t);
                    raw.push(' ');
                }
                _ => {}
            },
            Edge::Close(node) => {
                if let Node::Element(el) = node.value() {
                    if SKIPPED_ELEMENTS.contains(&el.name()) {
                        skip_depth -= 1;
                    }
                }
            }
        }
    }

    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup_and_script_content() {
        let html = r#"
            <html><head><title>t</title><style>p { color: red }</style></head>
            <body>
              <script>var hidden = "secret";</script>
              <p>Berlin is the   capital of Germany.</p>
              <p>It has 3.6M residents.</p>
            </body></html>
        "#;
        let text = html_to_text(html);
        assert_eq!(text, "Berlin is the capital of Germany. It has 3.6M residents.");
        assert!(!text.contains("secret"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn empty_document_yields_empty_text() {
        assert_eq!(html_to_text(""), "");
    }
}
