//! Network install backend: HTTP GET sources routed into installer
//! transactions.
//!
//! Redirects are followed manually: a 301/302 response replaces the
//! requested URL with its `Location` header and the request is reopened,
//! up to [`MAX_REDIRECTS`] hops. 200 is the only acceptable final status;
//! anything else fails the item with the numeric code attached for
//! diagnostics. Certificate validation is disabled by policy for this
//! flow - install URLs are routinely self-signed ad-hoc servers.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, redirect};
use tracing::{debug, instrument, warn};
use url::Url;

use super::package::RoutedDestination;
use super::service::InstallService;
use crate::transfer::{SourceRead, TransferBackend, TransferError};

/// Upper bound on redirect hops per item. The bound turns a redirect
/// loop into a per-item error instead of a hang.
pub const MAX_REDIRECTS: usize = 8;

/// HTTP connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Builds the HTTP client used for install downloads.
///
/// # Panics
///
/// Panics if the client builder fails with this static configuration,
/// which should never happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn build_install_client() -> Client {
    Client::builder()
        .redirect(redirect::Policy::none())
        .danger_accept_invalid_certs(true)
        .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .expect("failed to build HTTP client with static configuration")
}

/// An open HTTP GET stream positioned at the start of the response body.
#[derive(Debug)]
pub struct HttpSource {
    /// Final URL after redirect following.
    url: String,
    response: Response,
    /// Bytes received from the transport but not yet handed to the
    /// engine's buffer.
    leftover: Vec<u8>,
    leftover_pos: usize,
    exhausted: bool,
}

impl HttpSource {
    /// Opens `url`, following 301/302 redirects up to [`MAX_REDIRECTS`]
    /// hops.
    #[instrument(skip(client), fields(url = %url))]
    pub async fn open(client: &Client, url: &str) -> Result<Self, TransferError> {
        let mut current = url.to_string();

        for _hop in 0..=MAX_REDIRECTS {
            let response = client
                .get(&current)
                .send()
                .await
                .map_err(|e| TransferError::network(current.clone(), e))?;
            let status = response.status();

            if status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| TransferError::http_status(current.clone(), status.as_u16()))?;
                let next = resolve_location(&current, location);
                debug!(from = %current, to = %next, "following redirect");
                current = next;
                continue;
            }

            if status != StatusCode::OK {
                return Err(TransferError::http_status(current, status.as_u16()));
            }

            return Ok(Self {
                url: current,
                response,
                leftover: Vec::new(),
                leftover_pos: 0,
                exhausted: false,
            });
        }

        warn!(url = %current, "redirect chain exceeded {MAX_REDIRECTS} hops");
        Err(TransferError::http_status(current, 302))
    }

    /// The URL the body is actually being read from.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Body length advertised by the server, 0 when unknown.
    ///
    /// A chunked response without `Content-Length` reports 0 here, which
    /// the engine's default empty-source policy treats as an empty item:
    /// it completes without opening a destination. Install servers always
    /// advertise a length; a server that does not gets a no-op install,
    /// not an error.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.response.content_length().unwrap_or(0)
    }

    /// Reads the next piece of the body into `buf`. Transfers are
    /// sequential; the engine's offset is implicit in the stream position.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<SourceRead, TransferError> {
        if self.leftover_pos >= self.leftover.len() {
            if self.exhausted {
                return Ok(SourceRead::done(0));
            }
            match self
                .response
                .chunk()
                .await
                .map_err(|e| TransferError::network(self.url.clone(), e))?
            {
                // An empty frame mid-stream is "nothing yet", not EOF.
                Some(chunk) if chunk.is_empty() => return Ok(SourceRead::pending()),
                Some(chunk) => {
                    self.leftover = chunk.to_vec();
                    self.leftover_pos = 0;
                }
                None => {
                    self.exhausted = true;
                    return Ok(SourceRead::done(0));
                }
            }
        }

        let remaining = &self.leftover[self.leftover_pos..];
        let take = remaining.len().min(buf.len());
        buf[..take].copy_from_slice(&remaining[..take]);
        self.leftover_pos += take;
        Ok(SourceRead::done(take))
    }
}

/// Resolves a `Location` header value against the current URL; relative
/// redirects are joined, unparseable ones passed through as-is.
fn resolve_location(current: &str, location: &str) -> String {
    match Url::parse(current).and_then(|base| base.join(location)) {
        Ok(joined) => joined.to_string(),
        Err(_) => location.to_string(),
    }
}

/// Backend installing one title or ticket per URL.
pub struct UrlInstallBackend {
    urls: Vec<String>,
    client: Client,
    service: Arc<dyn InstallService>,
}

impl std::fmt::Debug for UrlInstallBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlInstallBackend")
            .field("urls", &self.urls)
            .finish_non_exhaustive()
    }
}

impl UrlInstallBackend {
    /// Creates a backend over `urls`, installing through `service`.
    #[must_use]
    pub fn new(urls: Vec<String>, service: Arc<dyn InstallService>) -> Self {
        Self {
            urls,
            client: build_install_client(),
            service,
        }
    }

    /// Replaces the HTTP client (tests point this at a local server).
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// The URL work list.
    #[must_use]
    pub fn urls(&self) -> &[String] {
        &self.urls
    }
}

#[async_trait]
impl TransferBackend for UrlInstallBackend {
    type Source = HttpSource;
    type Destination = RoutedDestination;

    fn item_count(&self) -> usize {
        self.urls.len()
    }

    async fn open_source(&mut self, index: usize) -> Result<HttpSource, TransferError> {
        HttpSource::open(&self.client, &self.urls[index]).await
    }

    async fn close_source(
        &mut self,
        _index: usize,
        source: HttpSource,
        _succeeded: bool,
    ) -> Result<(), TransferError> {
        drop(source);
        Ok(())
    }

    // Unknown lengths surface as 0; see [`HttpSource::content_length`].
    async fn source_size(&mut self, source: &mut HttpSource) -> Result<u64, TransferError> {
        Ok(source.content_length())
    }

    async fn read_source(
        &mut self,
        source: &mut HttpSource,
        _offset: u64,
        buf: &mut [u8],
    ) -> Result<SourceRead, TransferError> {
        source.read(buf).await
    }

    async fn open_destination(
        &mut self,
        _index: usize,
        initial_block: &[u8],
    ) -> Result<RoutedDestination, TransferError> {
        RoutedDestination::open(self.service.as_ref(), initial_block).await
    }

    async fn close_destination(
        &mut self,
        _index: usize,
        destination: RoutedDestination,
        succeeded: bool,
    ) -> Result<(), TransferError> {
        destination.close(self.service.as_ref(), succeeded).await
    }

    async fn write_destination(
        &mut self,
        destination: &mut RoutedDestination,
        offset: u64,
        buf: &[u8],
    ) -> Result<usize, TransferError> {
        destination.write(offset, buf).await
    }

    fn on_error(&mut self, index: usize, error: &TransferError) -> bool {
        if error.is_cancelled() {
            return false;
        }
        warn!(index, url = %self.urls[index], %error, "URL install failed");
        index + 1 < self.urls.len()
    }
}
