use super::http::{HttpFetcher, HttpOptions};
use super::{CollectionResult, Collector};
use crate::errors::CollectorError;
use crate::parser::{FlattenMode, JsonLiteParser};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    /// e.g. `https://api.github.com/users/<org>/repos`
    pub stats_uri: String,
    /// Top-level keys lifted into tags; their last `_` segment also
    /// allow-lists nested fields.
    #[serde(default)]
    pub tag_keys: Vec<String>,
    #[serde(default)]
    pub mode: FlattenMode,
    #[serde(flatten)]
    pub http: HttpOptions,
}

/// Repository statistics from the GitHub REST API, one metric per repo.
pub struct GithubCollector {
    config: GithubConfig,
    fetcher: HttpFetcher,
    parser: JsonLiteParser,
}

impl GithubCollector {
    pub fn new(config: GithubConfig) -> Result<Self, CollectorError> {
        let fetcher = config.http.fetcher()?;
        let parser = JsonLiteParser::new("github", config.tag_keys.clone(), BTreeMap::new())
            .with_mode(config.mode);
        Ok(Self {
            config,
            fetcher,
            parser,
        })
    }
}

#[async_trait]
impl Collector for GithubCollector {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn collect(&self) -> Result<CollectionResult, CollectorError> {
        let fetched = self.fetcher.fetch(&self.config.stats_uri).await?;
        let mut result = CollectionResult::new(self.name());
        result.absorb(self.parser.parse(fetched.body.as_bytes())?);
        Ok(result)
    }
}
