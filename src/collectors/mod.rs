pub mod github;
pub mod http;
pub mod twitter;
pub mod wordpress;
pub mod youtube;

use crate::errors::CollectorError;
use crate::metric::Metric;
use crate::parser::ParsedBatch;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

#[async_trait]
pub trait Collector: Send + Sync {
    /// plugin name as used in logs and reports
    fn name(&self) -> &'static str;

    /// poll the upstream API and return the flattened metrics.
    async fn collect(&self) -> Result<CollectionResult, CollectorError>;
}

/// Output of one collector run. Endpoint-level failures that did not stop
/// the run are kept in `errors`.
#[derive(Debug)]
pub struct CollectionResult {
    pub plugin: String,
    pub metrics: Vec<Metric>,
    pub errors: Vec<CollectorError>,
    pub latency_us: u64,
}

impl CollectionResult {
    pub fn new(plugin: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            metrics: Vec::new(),
            errors: Vec::new(),
            latency_us: 0,
        }
    }

    /// Take the metrics of a parsed batch and record its skipped elements.
    pub fn absorb(&mut self, batch: ParsedBatch) {
        self.metrics.extend(batch.metrics);
        self.errors
            .extend(batch.errors.into_iter().map(CollectorError::Parse));
    }

    /// Record the outcome of one endpoint without aborting the run.
    pub fn record(&mut self, outcome: Result<(), CollectorError>) {
        if let Err(e) = outcome {
            self.errors.push(e);
        }
    }
}

/// Run a collector and fill in how long it took.
pub async fn timed_collect(collector: &dyn Collector) -> Result<CollectionResult, CollectorError> {
    let start = Instant::now();
    let mut result = collector.collect().await?;
    result.latency_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
    Ok(result)
}

/// `<plugin>` or `<plugin>_<name>` when an instance name is configured.
pub fn measurement_name(plugin: &str, name: &str) -> String {
    if name.is_empty() {
        plugin.to_string()
    } else {
        format!("{plugin}_{name}")
    }
}

/// The `[inputs]` section of the plugin file; each plugin may appear any
/// number of times.
#[derive(Debug, Default, Deserialize)]
pub struct Inputs {
    #[serde(default)]
    pub github: Vec<github::GithubConfig>,
    #[serde(default)]
    pub youtube: Vec<youtube::YoutubeConfig>,
    #[serde(default)]
    pub wordpress: Vec<wordpress::WordpressConfig>,
    #[serde(default)]
    pub twitter: Vec<twitter::TwitterConfig>,
}

impl Inputs {
    pub fn is_empty(&self) -> bool {
        self.github.is_empty()
            && self.youtube.is_empty()
            && self.wordpress.is_empty()
            && self.twitter.is_empty()
    }

    pub fn build(&self) -> Result<Vec<Arc<dyn Collector>>, CollectorError> {
        let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
        for cfg in &self.github {
            collectors.push(Arc::new(github::GithubCollector::new(cfg.clone())?));
        }
        for cfg in &self.youtube {
            collectors.push(Arc::new(youtube::YoutubeCollector::new(cfg.clone())?));
        }
        for cfg in &self.wordpress {
            collectors.push(Arc::new(wordpress::WordpressCollector::new(cfg.clone())?));
        }
        for cfg in &self.twitter {
            collectors.push(Arc::new(twitter::TwitterCollector::new(cfg.clone())?));
        }
        Ok(collectors)
    }
}
