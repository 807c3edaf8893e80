//! Tile service client over HTTP.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::TileService;
use crate::error::FetchError;
use crate::metadata::MetadataQuery;
use crate::tile_grid::TileCoordinate;

const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest<'a> {
    map_type: &'a str,
    language: &'a str,
    region: &'a str,
}

#[derive(Deserialize)]
struct SessionResponse {
    session: String,
}

/// [`TileService`] implementation talking to the tile API with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTileService {
    client: Client,
    base_url: String,
    api_key: String,
    language: String,
    region: String,
}

impl HttpTileService {
    /// Creates a client for the given API key. `timeout` bounds every single request.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("streetview-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| FetchError::Connect(err.to_string()))?;

        Ok(Self::with_client(client, api_key, base_url))
    }

    /// Creates a service sending its requests through an already configured client.
    pub fn with_client(
        client: Client,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            language: "en-US".into(),
            region: "US".into(),
        }
    }

    /// Sets language and region sent on session creation.
    pub fn with_locale(mut self, language: impl Into<String>, region: impl Into<String>) -> Self {
        self.language = language.into();
        self.region = region.into();
        self
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Bytes, FetchError> {
        log::trace!("Requesting {url}");
        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            log::trace!("{url} answered {status}");
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response.bytes().await.map_err(map_reqwest_error)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_connect() || err.is_request() {
        FetchError::Connect(err.to_string())
    } else {
        FetchError::Body(err.to_string())
    }
}

#[async_trait::async_trait]
impl TileService for HttpTileService {
    async fn create_session(&self) -> Result<String, FetchError> {
        let url = format!("{}/v1/createSession", self.base_url);
        let request = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&SessionRequest {
                map_type: "streetview",
                language: &self.language,
                region: &self.region,
            });

        let body = self.send(request, &url).await?;
        let response: SessionResponse =
            serde_json::from_slice(&body).map_err(|err| FetchError::Decode(err.to_string()))?;
        Ok(response.session)
    }

    async fn fetch_metadata(
        &self,
        session: &str,
        query: &MetadataQuery,
    ) -> Result<Bytes, FetchError> {
        let url = format!("{}/v1/streetview/metadata", self.base_url);
        let request = self
            .client
            .get(&url)
            .query(&[("session", session), ("key", self.api_key.as_str())])
            .query(&query.query_pairs());

        self.send(request, &url).await
    }

    async fn fetch_tile(
        &self,
        session: &str,
        pano_id: &str,
        zoom: u8,
        coord: TileCoordinate,
    ) -> Result<Bytes, FetchError> {
        let url = format!(
            "{}/v1/streetview/tiles/{zoom}/{}/{}",
            self.base_url, coord.column, coord.row
        );
        let request = self.client.get(&url).query(&[
            ("session", session),
            ("key", self.api_key.as_str()),
            ("panoId", pano_id),
        ]);

        self.send(request, &url).await
    }
}
