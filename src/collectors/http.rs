use crate::errors::CollectorError;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Request settings shared by the HTTP-polling collectors.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpOptions {
    /// GET or POST (case-sensitive).
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Sent in the query for GET and as a form body for POST.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_response_timeout_ms() -> u64 {
    5000
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            method: default_method(),
            response_timeout_ms: default_response_timeout_ms(),
            parameters: BTreeMap::new(),
            headers: BTreeMap::new(),
        }
    }
}

impl HttpOptions {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn fetcher(&self) -> Result<HttpFetcher, CollectorError> {
        Ok(HttpFetcher::new(&self.method, self.response_timeout())?
            .with_parameters(self.parameters.clone())
            .with_headers(self.headers.clone()))
    }
}

/// Body and timing of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub body: String,
    /// Seconds until the response headers arrived.
    pub response_time: f64,
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    method: Method,
    parameters: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
}

impl HttpFetcher {
    pub fn new(method: &str, timeout: Duration) -> Result<Self, CollectorError> {
        let method = match method {
            "GET" => Method::GET,
            "POST" => Method::POST,
            other => {
                return Err(CollectorError::InvalidMethod {
                    method: other.to_string(),
                })
            }
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(CollectorError::HttpClient)?;

        Ok(Self {
            client,
            method,
            parameters: BTreeMap::new(),
            headers: BTreeMap::new(),
        })
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub async fn fetch(&self, server_url: &str) -> Result<FetchedBody, CollectorError> {
        self.send(server_url, None).await
    }

    /// Same as [`HttpFetcher::fetch`] with an `Authorization: Bearer` header.
    pub async fn fetch_with_bearer(
        &self,
        server_url: &str,
        token: &str,
    ) -> Result<FetchedBody, CollectorError> {
        self.send(server_url, Some(token)).await
    }

    async fn send(
        &self,
        server_url: &str,
        bearer: Option<&str>,
    ) -> Result<FetchedBody, CollectorError> {
        let mut url = Url::parse(server_url).map_err(|_| CollectorError::InvalidUrl {
            url: server_url.to_string(),
        })?;

        let mut form = Vec::new();
        if self.method == Method::POST {
            url.set_query(None);
            form.extend(self.parameters.iter());
        } else if !self.parameters.is_empty() {
            let mut query = url.query_pairs_mut();
            for (k, v) in &self.parameters {
                query.append_pair(k, v);
            }
        }

        let mut request = self.client.request(self.method.clone(), url.clone());
        if self.method == Method::POST {
            request = request.form(&form);
        }
        // a configured `host` header replaces the one derived from the URL
        for (k, v) in &self.headers {
            request = request.header(k.as_str(), v.as_str());
        }
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let start = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|source| CollectorError::Request {
                url: url.to_string(),
                source,
            })?;
        let response_time = start.elapsed().as_secs_f64();

        let status = response.status();
        if status != StatusCode::OK {
            return Err(CollectorError::Status {
                url: url.to_string(),
                status,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| CollectorError::Request {
                url: url.to_string(),
                source,
            })?;
        let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);

        tracing::debug!(url = %url, bytes = body.len(), response_time, "fetched");

        Ok(FetchedBody {
            body: String::from_utf8_lossy(body).into_owned(),
            response_time,
        })
    }
}
