use super::http::HttpFetcher;
use super::{measurement_name, CollectionResult, Collector};
use crate::errors::CollectorError;
use crate::parser::{FlattenMode, JsonLiteParser, ParsedBatch};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Deserialize)]
pub struct TwitterConfig {
    #[serde(default)]
    pub name: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub screen_names: Vec<String>,
    #[serde(default)]
    pub tag_keys: Vec<String>,
    /// Also gather the account profile, not just its timeline.
    #[serde(default)]
    pub gather_profile: bool,
    /// Defaults to `numeric`: every count is kept, `tag_keys` only name tags.
    #[serde(default = "default_mode")]
    pub mode: FlattenMode,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

fn default_token_url() -> String {
    "https://api.twitter.com/oauth2/token".to_string()
}

fn default_api_url() -> String {
    "https://api.twitter.com".to_string()
}

fn default_mode() -> FlattenMode {
    FlattenMode::Numeric
}

fn default_response_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token_type: String,
    access_token: String,
}

/// Timelines (and optionally profiles) of a set of accounts, gathered
/// concurrently with an application-only bearer token.
#[derive(Clone)]
pub struct TwitterCollector {
    inner: Arc<Inner>,
}

struct Inner {
    config: TwitterConfig,
    fetcher: HttpFetcher,
    measurement: String,
    token: OnceCell<String>,
}

impl TwitterCollector {
    pub fn new(config: TwitterConfig) -> Result<Self, CollectorError> {
        let fetcher =
            HttpFetcher::new("GET", Duration::from_millis(config.response_timeout_ms))?;
        let measurement = measurement_name("twitter", &config.name);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                measurement,
                token: OnceCell::new(),
            }),
        })
    }
}

impl Inner {
    /// OAuth2 client-credentials grant; the token is fetched once and reused.
    async fn bearer_token(&self) -> Result<&str, CollectorError> {
        let token = self
            .token
            .get_or_try_init(|| async {
                let response = self
                    .fetcher
                    .client()
                    .post(&self.config.token_url)
                    .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
                    .form(&[("grant_type", "client_credentials")])
                    .send()
                    .await
                    .map_err(|source| CollectorError::Request {
                        url: self.config.token_url.clone(),
                        source,
                    })?;

                if !response.status().is_success() {
                    return Err(CollectorError::Auth {
                        reason: format!("token endpoint returned {}", response.status()),
                    });
                }

                let token: TokenResponse =
                    response
                        .json()
                        .await
                        .map_err(|source| CollectorError::Request {
                            url: self.config.token_url.clone(),
                            source,
                        })?;
                if !token.token_type.eq_ignore_ascii_case("bearer") {
                    return Err(CollectorError::Auth {
                        reason: format!("unexpected token type {}", token.token_type),
                    });
                }
                Ok(token.access_token)
            })
            .await?;
        Ok(token.as_str())
    }

    fn parser(&self, screen_name: &str) -> JsonLiteParser {
        let mut tags = BTreeMap::new();
        tags.insert("screen_name".to_string(), screen_name.to_string());
        JsonLiteParser::new(self.measurement.as_str(), self.config.tag_keys.clone(), tags)
            .with_mode(self.config.mode)
    }

    async fn gather(&self, path: &str, screen_name: &str) -> Result<ParsedBatch, CollectorError> {
        let token = self.bearer_token().await?;
        let url = format!(
            "{}/1.1/{}?screen_name={}",
            self.config.api_url.trim_end_matches('/'),
            path,
            screen_name
        );
        let fetched = self.fetcher.fetch_with_bearer(&url, token).await?;

        let mut batch = self.parser(screen_name).parse(fetched.body.as_bytes())?;
        for metric in &mut batch.metrics {
            metric.add_field("response_time", fetched.response_time);
        }
        Ok(batch)
    }

    async fn gather_account(&self, screen_name: String) -> CollectionResult {
        let mut result = CollectionResult::new("twitter");

        match self.gather("statuses/user_timeline.json", &screen_name).await {
            Ok(batch) => result.absorb(batch),
            Err(e) => result.errors.push(e),
        }
        if self.config.gather_profile {
            match self.gather("users/show.json", &screen_name).await {
                Ok(batch) => result.absorb(batch),
                Err(e) => result.errors.push(e),
            }
        }
        result
    }
}

#[async_trait]
impl Collector for TwitterCollector {
    fn name(&self) -> &'static str {
        "twitter"
    }

    async fn collect(&self) -> Result<CollectionResult, CollectorError> {
        let mut tasks = JoinSet::new();
        for screen_name in &self.inner.config.screen_names {
            let inner = Arc::clone(&self.inner);
            let screen_name = screen_name.clone();
            tasks.spawn(async move { inner.gather_account(screen_name).await });
        }

        let mut result = CollectionResult::new(self.name());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(account) => {
                    result.metrics.extend(account.metrics);
                    result.errors.extend(account.errors);
                }
                Err(e) => result.errors.push(CollectorError::Task {
                    reason: e.to_string(),
                }),
            }
        }
        Ok(result)
    }
}
