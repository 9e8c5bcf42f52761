//! Table-oriented query interface over the backend's `rest/v1` surface.
//!
//! Filters compose the backend's `column=op.value` query syntax; the builder
//! keeps handlers free of URL assembly. Only the operations the application
//! actually issues are implemented.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{BackendClient, BackendError};

/// A composable query against one backend table.
pub struct TableQuery<'a> {
    client: &'a BackendClient,
    table: String,
    filters: Vec<(String, String)>,
    select: Option<String>,
    limit: Option<u32>,
    bearer: Option<String>,
}

impl<'a> TableQuery<'a> {
    pub(crate) fn new(client: &'a BackendClient, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
            filters: Vec::new(),
            select: None,
            limit: None,
            bearer: None,
        }
    }

    /// Restrict returned columns (`select=` projection).
    pub fn select(mut self, columns: &str) -> Self {
        self.select = Some(columns.to_string());
        self
    }

    /// Equality filter: `column=eq.value`.
    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.filters
            .push((column.to_string(), format!("eq.{value}")));
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    /// Forward the platform access token so row-level authorization applies
    /// to the signed-in principal instead of the anonymous role.
    pub fn bearer(mut self, token: Option<&str>) -> Self {
        self.bearer = token.map(|t| t.to_string());
        self
    }

    fn query_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(select) = &self.select {
            parts.push(format!("select={}", urlencoding::encode(select)));
        }
        for (column, predicate) in &self.filters {
            parts.push(format!("{column}={}", urlencoding::encode(predicate)));
        }
        if let Some(limit) = self.limit {
            parts.push(format!("limit={limit}"));
        }
        parts.join("&")
    }

    fn request(
        &self,
        method: reqwest::Method,
    ) -> Result<reqwest::RequestBuilder, BackendError> {
        let mut url = self.client.endpoint(&format!("rest/v1/{}", self.table))?;
        let query = self.query_string();
        if !query.is_empty() {
            url.set_query(Some(&query));
        }

        let mut request = self
            .client
            .http()
            .request(method, url)
            .header("apikey", self.client.api_key());

        let token = self.bearer.as_deref().unwrap_or(self.client.api_key());
        request = request.bearer_auth(token);

        Ok(request)
    }

    /// Fetch all matching rows.
    pub async fn fetch<T: DeserializeOwned>(self) -> Result<Vec<T>, BackendError> {
        let response = self.request(reqwest::Method::GET)?.send().await?;
        let response = BackendClient::check(response).await?;
        let rows = response.json::<Vec<T>>().await?;
        Ok(rows)
    }

    /// Fetch at most one row.
    pub async fn fetch_optional<T: DeserializeOwned>(mut self) -> Result<Option<T>, BackendError> {
        self.limit = Some(1);
        let mut rows = self.fetch::<T>().await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    /// Insert one or more rows.
    pub async fn insert<T: Serialize + ?Sized>(self, rows: &T) -> Result<(), BackendError> {
        let response = self
            .request(reqwest::Method::POST)?
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await?;
        BackendClient::check(response).await?;
        Ok(())
    }

    /// Apply a sparse update to all matching rows.
    pub async fn update<T: Serialize + ?Sized>(self, patch: &T) -> Result<(), BackendError> {
        let response = self
            .request(reqwest::Method::PATCH)?
            .header("Prefer", "return=minimal")
            .json(patch)
            .send()
            .await?;
        BackendClient::check(response).await?;
        Ok(())
    }
}
