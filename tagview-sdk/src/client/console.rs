//! Console REST client (dashboard → inventory server).

use reqwest::Client;
use url::Url;

use super::{ClientError, parse_ack, parse_response};
use crate::objects::search::{SearchRequest, SearchResults};
use crate::objects::unit::{RegisterUnitRequest, UnitRecord, UpdateLocationRequest};

/// Typed HTTP client for the inventory server's REST API.
///
/// All endpoints answer the uniform `{success, data, message}` envelope;
/// the client unwraps it and maps `success: false` to
/// [`ClientError::Rejected`] so callers always see a plain `Result`.
#[derive(Debug, Clone)]
pub struct ConsoleClient {
    http: Client,
    base_url: Url,
}

impl ConsoleClient {
    /// Create a new `ConsoleClient`.
    ///
    /// * `base_url` – root URL of the inventory server.
    pub fn new(base_url: Url) -> Self {
        Self {
            http: Client::new(),
            base_url,
        }
    }

    /// Replace the default `reqwest::Client` with a custom one.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `POST /api/v1/units/search` – paginated authoritative unit query.
    pub async fn search_units(
        &self,
        request: &SearchRequest,
    ) -> Result<SearchResults<UnitRecord>, ClientError> {
        let url = self.base_url.join("/api/v1/units/search")?;
        let resp = self.http.post(url).json(request).send().await?;
        parse_response(resp).await
    }

    /// `POST /api/v1/units` – register a new unit.
    pub async fn register_unit(
        &self,
        request: &RegisterUnitRequest,
    ) -> Result<UnitRecord, ClientError> {
        let url = self.base_url.join("/api/v1/units")?;
        let resp = self.http.post(url).json(request).send().await?;
        parse_response(resp).await
    }

    /// `PUT /api/v1/units/{tag_id}/location` – move a unit.
    pub async fn update_location(
        &self,
        request: &UpdateLocationRequest,
    ) -> Result<UnitRecord, ClientError> {
        let url = self
            .base_url
            .join(&format!("/api/v1/units/{}/location", request.tag_id))?;
        let resp = self.http.put(url).json(request).send().await?;
        parse_response(resp).await
    }

    /// `DELETE /api/v1/units/{tag_id}` – remove a unit.
    pub async fn delete_unit(&self, tag_id: &str) -> Result<(), ClientError> {
        let url = self.base_url.join(&format!("/api/v1/units/{tag_id}"))?;
        let resp = self.http.delete(url).send().await?;
        parse_ack(resp).await
    }
}
