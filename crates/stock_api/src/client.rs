use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::error::{parse_error_message, ApiError};
use crate::headers::{build_headers, ACCEPT_EVENT_STREAM, ACCEPT_JSON};
use crate::retry::{is_retryable_error_text, is_retryable_status, retry_delay, MAX_RETRIES};
use crate::url::{endpoint_url, normalize_api_base};

/// Whether a request may be repeated after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Reads and stream opening.
    Idempotent,
    /// Mutations are sent exactly once.
    Once,
}

#[derive(Debug)]
pub struct StockApiClient {
    http: Client,
    config: ApiConfig,
    base: String,
}

impl StockApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let base = normalize_api_base(&config.base_url);
        Url::parse(&base).map_err(|error| ApiError::InvalidBaseUrl(format!("{base}: {error}")))?;
        let http = Client::builder().build()?;
        Ok(Self { http, config, base })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn url(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url, ApiError> {
        endpoint_url(&self.base, segments, query)
    }

    pub fn build_headers(&self, accept: &str) -> Result<HeaderMap, ApiError> {
        let mut out = HeaderMap::new();
        for (key, value) in build_headers(&self.config, accept) {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| ApiError::InvalidHeader(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(&value).map_err(|_| {
                    ApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    fn request(
        &self,
        method: Method,
        url: Url,
        accept: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<RequestBuilder, ApiError> {
        let mut builder = self
            .http
            .request(method, url)
            .headers(self.build_headers(accept)?);
        if accept == ACCEPT_JSON {
            if let Some(timeout) = self.config.timeout {
                builder = builder.timeout(timeout);
            }
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder)
    }

    /// Sends a request, retrying transient failures when the policy allows.
    /// Non-2xx responses become [`ApiError::Status`].
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        accept: &str,
        body: Option<&serde_json::Value>,
        policy: RetryPolicy,
    ) -> Result<Response, ApiError> {
        let max_retries = match policy {
            RetryPolicy::Idempotent => MAX_RETRIES,
            RetryPolicy::Once => 0,
        };
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            let response = self
                .request(method.clone(), url.clone(), accept, body)?
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status);
                    let body = response.text().await.unwrap_or_default();
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    if attempt < max_retries && is_retryable_status(status.as_u16()) {
                        warn!(%url, %status, attempt, "retrying request after status");
                        tokio::time::sleep(retry_delay(attempt)).await;
                        continue;
                    }

                    return Err(ApiError::Status { status, message });
                }
                Err(error) => {
                    let message = error.to_string();
                    let transient = error.is_connect()
                        || error.is_timeout()
                        || is_retryable_error_text(&message);
                    last_error = Some(message);

                    if max_retries == 0 || !transient {
                        return Err(ApiError::Request(error));
                    }
                    if attempt < max_retries {
                        warn!(%url, attempt, error = ?last_error, "retrying request after transport error");
                        tokio::time::sleep(retry_delay(attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(ApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    pub async fn get_json<T>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let url = self.url(segments, query)?;
        debug!(%url, "GET");
        let response = self
            .send(Method::GET, url, ACCEPT_JSON, None, RetryPolicy::Idempotent)
            .await?;
        decode_json(response).await
    }

    pub async fn send_json<B, T>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(segments, query)?;
        debug!(%url, %method, "mutation");
        let body = body.map(serde_json::to_value).transpose()?;
        let response = self
            .send(method, url, ACCEPT_JSON, body.as_ref(), RetryPolicy::Once)
            .await?;
        decode_json(response).await
    }

    /// Sends a mutation whose response body is irrelevant.
    pub async fn send_no_content(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<(), ApiError> {
        let url = self.url(segments, query)?;
        debug!(%url, %method, "mutation");
        self.send(method, url, ACCEPT_JSON, None, RetryPolicy::Once)
            .await?;
        Ok(())
    }

    /// Opens the streaming endpoint. The response body is consumed by the caller.
    pub async fn open_stream<B>(&self, segments: &[&str], body: &B) -> Result<Response, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.url(segments, &[])?;
        debug!(%url, "opening turn stream");
        let body = serde_json::to_value(body)?;
        self.send(
            Method::POST,
            url,
            ACCEPT_EVENT_STREAM,
            Some(&body),
            RetryPolicy::Idempotent,
        )
        .await
    }
}

/// Empty bodies (e.g. `204`) decode as JSON `null`.
async fn decode_json<T>(response: Response) -> Result<T, ApiError>
where
    T: DeserializeOwned,
{
    let bytes = response.bytes().await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_value(serde_json::Value::Null)?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}
