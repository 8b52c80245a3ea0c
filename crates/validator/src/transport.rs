use reqwest::header;
use url::Url;

use crate::{
    error::{ValidatorError, ValidatorResult},
    headers::HeaderSet,
    util::http::HttpClient,
};

const MANIFEST_ACCEPT: &str = "application/dash+xml,video/vnd.mpeg.dash.mpd";

/// The validator's HTTP surface: one manifest fetch and two segment probe
/// shapes. Cheap to clone; clones share the underlying connection pool and
/// cookie store.
#[derive(Clone, Default)]
pub struct Transport {
    client: HttpClient,
}

impl Transport {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// GETs the manifest, returning its body together with the response
    /// headers so header policies can run on them later.
    pub async fn fetch_manifest(&self, url: &Url) -> ValidatorResult<(String, HeaderSet)> {
        tracing::debug!(%url, "fetching manifest");
        let response = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ValidatorError::HttpStatus(status));
        }

        let headers = HeaderSet::from_headers(response.headers());
        let body = response.text().await?;
        Ok((body, headers))
    }

    /// HEAD probe; the origin only serves headers.
    pub async fn fetch_segment_headers(&self, url: &Url) -> ValidatorResult<HeaderSet> {
        let response = self.client.head(url.clone()).send().await?;
        Self::capture_headers(response, false).await
    }

    /// GET probe. The body is downloaded and discarded so the origin serves
    /// the complete object rather than short-circuiting on a header request.
    pub async fn fetch_segment_full(&self, url: &Url) -> ValidatorResult<HeaderSet> {
        let response = self.client.get(url.clone()).send().await?;
        Self::capture_headers(response, true).await
    }

    async fn capture_headers(
        response: reqwest::Response,
        drain_body: bool,
    ) -> ValidatorResult<HeaderSet> {
        let status = response.status();
        if !status.is_success() {
            return Err(ValidatorError::HttpStatus(status));
        }

        let headers = HeaderSet::from_headers(response.headers());
        if drain_body {
            response.bytes().await?;
        }
        Ok(headers)
    }
}
