//! HTTP client for the Audisto crawl API.
//!
//! This module builds and executes the single request shape the API
//! supports: an HTTPS GET against `/{version}/crawls/{id}/{mode}` with
//! paging query parameters and HTTP Basic credentials carried in the
//! URL userinfo (a server quirk the exporter preserves for wire
//! compatibility). The client performs no retries and no status
//! interpretation; it hands the raw body and status to the engine and
//! fails only on transport errors.

use std::str::FromStr;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;

/// Domain name of the API endpoint.
pub const API_DOMAIN: &str = "api.audisto.com";

/// API version segment of the request path.
pub const API_VERSION: &str = "2.0";

/// What the crawl is asked to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One row per crawled page.
    Pages,
    /// One row per link between pages.
    Links,
}

impl Mode {
    /// The path segment for this mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pages => "pages",
            Self::Links => "links",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pages" => Ok(Self::Pages),
            "links" => Ok(Self::Links),
            other => Err(DownloadError::config(format!(
                "mode has to be 'pages' or 'links', not {other:?}"
            ))),
        }
    }
}

/// Response body format requested from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Tab-separated rows, first line a header.
    Tsv,
    /// JSON envelope; only used for the total-count probe.
    Json,
}

impl OutputFormat {
    fn as_str(self) -> &'static str {
        match self {
            Self::Tsv => "tsv",
            Self::Json => "json",
        }
    }
}

/// Everything that identifies one export job against the API.
///
/// Immutable for the lifetime of an invocation except for `filter` and
/// `mode`, which the engine rewrites between targets and stages.
#[derive(Debug, Clone)]
pub struct CrawlSelector {
    /// Account username.
    pub username: String,
    /// Account password.
    pub password: String,
    /// Numeric crawl identifier.
    pub crawl_id: u64,
    /// Pages or links.
    pub mode: Mode,
    /// Whether the server should include detailed fields.
    pub deep: bool,
    /// Opaque filter expression; empty means unfiltered.
    pub filter: String,
    /// Opaque ordering expression; empty means server default.
    pub order: String,
}

impl CrawlSelector {
    /// Checks the selector without any remote request.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for empty credentials or a zero
    /// crawl id.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.username.trim().is_empty() || self.password.trim().is_empty() {
            return Err(DownloadError::config(
                "username and password must not be empty",
            ));
        }
        if self.crawl_id == 0 {
            return Err(DownloadError::config("crawl ID must not be zero"));
        }
        Ok(())
    }
}

/// One paged fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Zero-based chunk index.
    pub chunk_index: u64,
    /// Rows per chunk for this request.
    pub chunk_size: u64,
    /// Body format to request.
    pub output: OutputFormat,
}

/// Envelope of the total-count probe response.
#[derive(Debug, Deserialize)]
struct CountEnvelope {
    chunk: CountChunk,
}

#[derive(Debug, Deserialize)]
struct CountChunk {
    total: u64,
}

/// Stateless builder and executor of API requests.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    selector: CrawlSelector,
}

impl ApiClient {
    /// Creates a client against the production endpoint.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the selector is invalid or the
    /// HTTP client cannot be constructed.
    pub fn new(selector: CrawlSelector) -> Result<Self, DownloadError> {
        let base_url = Url::parse(&format!("https://{API_DOMAIN}/"))
            .map_err(|e| DownloadError::config(format!("bad API domain: {e}")))?;
        Self::with_base_url(selector, base_url)
    }

    /// Creates a client against an arbitrary base URL (used by tests).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the selector is invalid or the
    /// HTTP client cannot be constructed.
    pub fn with_base_url(selector: CrawlSelector, base_url: Url) -> Result<Self, DownloadError> {
        selector.validate()?;
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .gzip(true)
            .deflate(true)
            .build()
            .map_err(|e| DownloadError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            selector,
        })
    }

    /// The selector this client was built from.
    #[must_use]
    pub fn selector(&self) -> &CrawlSelector {
        &self.selector
    }

    /// Current request mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.selector.mode
    }

    /// Switches between pages and links requests.
    pub fn set_mode(&mut self, mode: Mode) {
        self.selector.mode = mode;
    }

    /// Restricts the export to links targeting one page.
    pub fn set_target_page_filter(&mut self, page_id: u64) {
        self.selector.filter = format!("target_page:{page_id}");
    }

    /// Drops any active filter expression.
    pub fn clear_filter(&mut self) {
        self.selector.filter.clear();
    }

    /// Builds the request URL with credentials, path and query parameters
    /// in the contract order: deep, filter, order, chunk, chunk_size,
    /// output.
    fn request_url(&self, request: &ChunkRequest, deep: bool) -> Result<Url, DownloadError> {
        let mut url = self.base_url.clone();
        url.set_username(&self.selector.username)
            .map_err(|()| DownloadError::config("cannot embed username in API URL"))?;
        url.set_password(Some(&self.selector.password))
            .map_err(|()| DownloadError::config("cannot embed password in API URL"))?;
        url.set_path(&format!(
            "/{API_VERSION}/crawls/{}/{}",
            self.selector.crawl_id, self.selector.mode
        ));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("deep", if deep { "1" } else { "0" });
            if !self.selector.filter.is_empty() {
                query.append_pair("filter", &self.selector.filter);
            }
            if !self.selector.order.is_empty() {
                query.append_pair("order", &self.selector.order);
            }
            query.append_pair("chunk", &request.chunk_index.to_string());
            query.append_pair("chunk_size", &request.chunk_size.to_string());
            query.append_pair("output", request.output.as_str());
        }
        Ok(url)
    }

    /// Executes one GET and returns the (decompressed) body and status.
    async fn execute(&self, url: Url) -> Result<(Vec<u8>, u16), DownloadError> {
        let display_url = redacted(&url);
        debug!(url = %display_url, "requesting chunk");

        let response = self
            .http
            .get(url)
            .header(CONNECTION, "Keep-Alive")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(CONTENT_LENGTH, "0")
            .send()
            .await
            .map_err(|e| DownloadError::network(display_url.clone(), e))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadError::network(display_url, e))?;
        Ok((body.to_vec(), status))
    }

    /// Fetches one chunk of the export stream.
    ///
    /// # Errors
    ///
    /// Fails only on transport errors; any HTTP status is returned to
    /// the caller together with the body.
    #[instrument(level = "debug", skip(self), fields(chunk = request.chunk_index, chunk_size = request.chunk_size))]
    pub async fn fetch_chunk(
        &self,
        request: &ChunkRequest,
    ) -> Result<(Vec<u8>, u16), DownloadError> {
        let url = self.request_url(request, self.selector.deep)?;
        self.execute(url).await
    }

    /// Fetches the total-count probe: `chunk=0, chunk_size=1,
    /// output=json, deep=0`, retaining filter and order so the count
    /// matches the stream that will actually be exported.
    ///
    /// # Errors
    ///
    /// Fails only on transport errors.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_total_count(&self) -> Result<(Vec<u8>, u16), DownloadError> {
        let request = ChunkRequest {
            chunk_index: 0,
            chunk_size: 1,
            output: OutputFormat::Json,
        };
        let url = self.request_url(&request, false)?;
        self.execute(url).await
    }
}

/// Reads `total` out of the count probe envelope
/// `{"chunk": {"total": N, ...}}`.
///
/// # Errors
///
/// Returns a parse error for anything that is not the expected envelope.
pub fn parse_total_count(body: &[u8]) -> Result<u64, DownloadError> {
    let envelope: CountEnvelope = serde_json::from_slice(body)
        .map_err(|e| DownloadError::parse(format!("total-count response: {e}")))?;
    Ok(envelope.chunk.total)
}

/// URL with userinfo stripped, safe for logs and error messages.
fn redacted(url: &Url) -> String {
    let mut clean = url.clone();
    let _ = clean.set_username("");
    let _ = clean.set_password(None);
    clean.to_string()
}
