use reqwest::{Client, Method, Url};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::models::{ExecutionConfig, HttpMethod, HttpResponse, ResolvedRequest};

/// Deadline and retry behaviour for one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Hard deadline for each attempt
    pub timeout: Duration,
    /// Extra attempts after the first one fails with a transport error
    pub retries: u32,
    /// Delay before the first retry; doubles for every further retry
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 2,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Engine defaults overridden by whatever the execution config sets
    pub fn from_config(engine: &EngineConfig, config: &ExecutionConfig) -> Self {
        Self {
            timeout: config
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(engine.default_timeout),
            retries: config.retries.unwrap_or(engine.default_retries),
            backoff: config
                .backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(engine.default_backoff),
        }
    }

    /// Sleep before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(retry))
    }
}

/// Sends resolved requests; holds one pooled client for the whole engine
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: Client,
}

impl HttpInvoker {
    pub fn new() -> AppResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Send `request`, retrying timeouts and connection failures.
    ///
    /// Any HTTP status, 4xx and 5xx included, is a completed response.
    pub async fn invoke(
        &self,
        request: &ResolvedRequest,
        policy: &RetryPolicy,
    ) -> AppResult<HttpResponse> {
        let url = build_url(request)?;
        let mut attempt = 0;

        loop {
            match self.send_once(request, url.clone(), policy.timeout).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transport() && attempt < policy.retries => {
                    let delay = policy.delay_for(attempt);
                    attempt += 1;
                    tracing::warn!(
                        url = %url,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(
        &self,
        request: &ResolvedRequest,
        url: Url,
        timeout: Duration,
    ) -> AppResult<HttpResponse> {
        let start = Instant::now();
        let mut builder = self
            .client
            .request(to_method(request.method), url)
            .timeout(timeout);

        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        if request.method.has_body() {
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        let text = response.text().await?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        // Non-JSON bodies are kept as a JSON string
        let body = serde_json::from_str(&text)
            .unwrap_or_else(|_| serde_json::Value::String(text.clone()));

        tracing::debug!(status = status, elapsed_ms = elapsed_ms, "Received response");

        Ok(HttpResponse {
            status,
            headers,
            body,
            text,
            elapsed_ms,
        })
    }
}

fn build_url(request: &ResolvedRequest) -> AppResult<Url> {
    let mut url = Url::parse(&request.url)
        .map_err(|e| AppError::Validation(format!("Invalid URL '{}': {}", request.url, e)))?;

    if !request.query_params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &request.query_params {
            pairs.append_pair(key, value);
        }
    }

    Ok(url)
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> ResolvedRequest {
        ResolvedRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: BTreeMap::new(),
            query_params: BTreeMap::new(),
            body: None,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            retries: 3,
            backoff: Duration::from_millis(200),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(1), Duration::from_millis(400));
        assert_eq!(policy.delay_for(2), Duration::from_millis(800));
    }

    #[test]
    fn test_policy_from_config() {
        let engine = EngineConfig::default();
        let policy = RetryPolicy::from_config(&engine, &ExecutionConfig::default());
        assert_eq!(policy.timeout, engine.default_timeout);
        assert_eq!(policy.retries, engine.default_retries);

        let config = ExecutionConfig {
            timeout_seconds: Some(3),
            retries: Some(0),
            backoff_ms: Some(10),
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&engine, &config);
        assert_eq!(policy.timeout, Duration::from_secs(3));
        assert_eq!(policy.retries, 0);
        assert_eq!(policy.backoff, Duration::from_millis(10));
    }

    #[test]
    fn test_build_url_appends_query() {
        let mut req = request("http://svc/users?active=true");
        req.query_params.insert("page".to_string(), "2".to_string());
        req.query_params.insert("q".to_string(), "a b".to_string());

        let url = build_url(&req).unwrap();
        assert_eq!(url.as_str(), "http://svc/users?active=true&page=2&q=a+b");
    }

    #[test]
    fn test_build_url_rejects_relative() {
        assert!(matches!(
            build_url(&request("/users/1")),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let invoker = HttpInvoker::new().unwrap();
        let policy = RetryPolicy {
            timeout: Duration::from_secs(2),
            retries: 1,
            backoff: Duration::from_millis(1),
        };

        // Port 1 is reserved and nothing listens on it
        let result = invoker.invoke(&request("http://127.0.0.1:1/"), &policy).await;
        assert!(matches!(result, Err(e) if e.is_transport()));
    }
}
