//! PostgREST client: bulk reads and the two task commands.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

use alva_core::security::Credentials;
use alva_core::{BackendError, FetchQuery, NewTask, Order, Table, Task, TaskId};

pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl RestClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(network)?;
        Ok(Self::with_client(http, base_url, credentials))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.as_str())
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, BackendError> {
        Ok(request.headers(auth_headers(&self.credentials)?))
    }

    /// `select *` with the query's ordering and limit. Rows come back
    /// untyped; decoding is the caller's business.
    pub async fn fetch(&self, query: &FetchQuery) -> Result<Vec<Value>, BackendError> {
        let direction = match query.order {
            Order::Ascending => "asc",
            Order::Descending => "desc",
        };
        let mut params = vec![
            ("select", "*".to_string()),
            ("order", format!("{}.{}", query.order_by, direction)),
        ];
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }

        let request = self.http.get(self.table_url(query.table)).query(&params);
        let response = self.authorized(request)?.send().await.map_err(network)?;
        let rows: Vec<Value> = check(response).await?.json().await.map_err(decode)?;
        debug!(table = %query.table, rows = rows.len(), "fetched");
        Ok(rows)
    }

    pub async fn insert_task(&self, task: &NewTask) -> Result<Task, BackendError> {
        task.validate()?;
        let request = self
            .http
            .post(self.table_url(Table::Tasks))
            .header("Prefer", "return=representation")
            .json(&task.to_row());
        let response = self.authorized(request)?.send().await.map_err(network)?;
        let rows: Vec<Value> = check(response).await?.json().await.map_err(decode)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode("insert returned no row".into()))?;
        Ok(serde_json::from_value(row)?)
    }

    pub async fn delete_task(&self, id: &TaskId) -> Result<(), BackendError> {
        let request = self
            .http
            .delete(self.table_url(Table::Tasks))
            .query(&[("id", format!("eq.{id}"))]);
        let response = self.authorized(request)?.send().await.map_err(network)?;
        check(response).await?;
        Ok(())
    }
}

/// `apikey` plus `Authorization: Bearer`, shared with the auth client.
pub(crate) fn auth_headers(credentials: &Credentials) -> Result<HeaderMap, BackendError> {
    let mut headers = HeaderMap::new();
    let apikey = HeaderValue::from_str(credentials.anon_key.expose())
        .map_err(|_| BackendError::InvalidRequest("anon key is not a valid header value".into()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", credentials.bearer()))
        .map_err(|_| BackendError::InvalidRequest("token is not a valid header value".into()))?;
    headers.insert("apikey", apikey);
    headers.insert(AUTHORIZATION, bearer);
    Ok(headers)
}

/// Turn a non-2xx response into the matching error.
pub(crate) async fn check(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    match BackendError::from_status(status.as_u16(), body) {
        BackendError::RateLimited { .. } => Err(BackendError::RateLimited { retry_after }),
        other => Err(other),
    }
}

pub(crate) fn network(e: reqwest::Error) -> BackendError {
    BackendError::Network(e.to_string())
}

pub(crate) fn decode(e: reqwest::Error) -> BackendError {
    BackendError::Decode(e.to_string())
}
