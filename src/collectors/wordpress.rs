use super::http::{HttpFetcher, HttpOptions};
use super::{CollectionResult, Collector};
use crate::errors::CollectorError;
use crate::metric::{FieldValue, Metric};
use crate::parser::{FlattenMode, JsonLiteParser, ParsedBatch};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::BTreeMap;

// The stats endpoints wrap the interesting array in envelopes the parser
// cannot use; these rewrites cut the array out. They assume the compact
// single-line JSON the API returns.
static TOP_POSTS_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(.*?)(\[.*\])(,"total_views":.*)$"#).expect("valid regex"));
static POST_META: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#","meta":\s*\{.*?\}\}"#).expect("valid regex"));
static POSTS_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.*?(\[.*\])").expect("valid regex"));
static TAG_STATS_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\[]+(.*\])\}").expect("valid regex"));

#[derive(Debug, Clone, Deserialize)]
pub struct WordpressConfig {
    #[serde(default)]
    pub top_posts_stats_uri: String,
    #[serde(default)]
    pub summary_stats_uri: String,
    #[serde(default)]
    pub posts_uri: String,
    #[serde(default)]
    pub tag_stats_uri: String,
    #[serde(default)]
    pub top_posts_tag_keys: Vec<String>,
    #[serde(default)]
    pub summary_stats_tag_keys: Vec<String>,
    #[serde(default)]
    pub posts_tag_keys: Vec<String>,
    #[serde(default)]
    pub tag_stats_tag_keys: Vec<String>,
    #[serde(default)]
    pub mode: FlattenMode,
    #[serde(flatten)]
    pub http: HttpOptions,
}

/// Site statistics from the WordPress.com REST API. Each configured
/// endpoint is gathered independently; an empty URI skips it.
pub struct WordpressCollector {
    config: WordpressConfig,
    fetcher: HttpFetcher,
}

impl WordpressCollector {
    pub fn new(config: WordpressConfig) -> Result<Self, CollectorError> {
        let fetcher = config.http.fetcher()?;
        Ok(Self { config, fetcher })
    }

    fn parser(&self, name: &str, tag_keys: &[String]) -> JsonLiteParser {
        JsonLiteParser::new(name, tag_keys.to_vec(), BTreeMap::new()).with_mode(self.config.mode)
    }

    async fn fetch_and_parse(
        &self,
        uri: &str,
        parser: JsonLiteParser,
        rewrite: fn(&str) -> Cow<'_, str>,
    ) -> Result<ParsedBatch, CollectorError> {
        let fetched = self.fetcher.fetch(uri).await?;
        let payload = rewrite(&fetched.body);
        Ok(parser.parse(payload.as_bytes())?)
    }

    async fn gather_top_posts(&self, result: &mut CollectionResult) -> Result<(), CollectorError> {
        let parser = self.parser("wordpress_topposts", &self.config.top_posts_tag_keys);
        let batch = self
            .fetch_and_parse(&self.config.top_posts_stats_uri, parser, top_posts_payload)
            .await?;
        result.absorb(batch);
        Ok(())
    }

    async fn gather_summary(&self, result: &mut CollectionResult) -> Result<(), CollectorError> {
        let parser = self.parser("wordpress_summary", &self.config.summary_stats_tag_keys);
        let batch = self
            .fetch_and_parse(&self.config.summary_stats_uri, parser, unchanged)
            .await?;
        result.absorb(batch);
        Ok(())
    }

    async fn gather_posts(&self, result: &mut CollectionResult) -> Result<(), CollectorError> {
        let parser = self.parser("wordpress_posts", &self.config.posts_tag_keys);
        let mut batch = self
            .fetch_and_parse(&self.config.posts_uri, parser, posts_payload)
            .await?;
        batch.metrics.iter_mut().for_each(fold_taxonomies);
        result.absorb(batch);
        Ok(())
    }

    async fn gather_tag_stats(&self, result: &mut CollectionResult) -> Result<(), CollectorError> {
        let parser = self.parser("wordpress_tagstats", &self.config.tag_stats_tag_keys);
        let mut batch = self
            .fetch_and_parse(&self.config.tag_stats_uri, parser, tag_stats_payload)
            .await?;
        batch.metrics.iter_mut().for_each(promote_tag_stats);
        result.absorb(batch);
        Ok(())
    }
}

fn unchanged(body: &str) -> Cow<'_, str> {
    Cow::Borrowed(body)
}

/// `{"days":{"<date>":{"postviews":[...],"total_views":...}}}` -> `[...]`
fn top_posts_payload(body: &str) -> Cow<'_, str> {
    TOP_POSTS_ARRAY.replace_all(body, "$2")
}

/// `{"found":N,"posts":[...],"meta":{...}}` -> `[...]`, with every nested
/// `meta` object removed.
fn posts_payload(body: &str) -> Cow<'_, str> {
    let stripped = POST_META.replace_all(body, "");
    Cow::Owned(POSTS_ARRAY.replace_all(&stripped, "$1").into_owned())
}

/// `{"date":"...","tags":[...]}` -> `[...]`
fn tag_stats_payload(body: &str) -> Cow<'_, str> {
    TAG_STATS_ARRAY.replace_all(body, "$1")
}

/// Collapse the per-term `categories_*_slug` / `tags_*_slug` fields into
/// comma-joined `categories` and `tags` string fields; all other taxonomy
/// fields are dropped.
fn fold_taxonomies(metric: &mut Metric) {
    let mut categories = Vec::new();
    let mut tags = Vec::new();
    let fields = metric.take_fields();

    for (k, v) in fields {
        let is_category = k.starts_with("categories");
        let is_tag = k.starts_with("tags");
        if is_category || is_tag {
            if k.ends_with("slug") {
                if let FieldValue::String(slug) = v {
                    if is_category {
                        categories.push(slug);
                    } else {
                        tags.push(slug);
                    }
                }
            }
            continue;
        }
        metric.add_field(k, v);
    }

    if !categories.is_empty() {
        metric.add_field("categories", categories.join(","));
    }
    if !tags.is_empty() {
        metric.add_field("tags", tags.join(","));
    }
}

/// Strip the `tags_0_` wrapper from field keys and turn `type` and `name`
/// into tags.
fn promote_tag_stats(metric: &mut Metric) {
    let fields = metric.take_fields();
    for (k, v) in fields {
        let k = k.replacen("tags_0_", "", 1);
        match v {
            FieldValue::String(s) if k == "type" || k == "name" => metric.add_tag(k, s),
            v => metric.add_field(k, v),
        }
    }
}

#[async_trait]
impl Collector for WordpressCollector {
    fn name(&self) -> &'static str {
        "wordpress"
    }

    async fn collect(&self) -> Result<CollectionResult, CollectorError> {
        let mut result = CollectionResult::new(self.name());

        if !self.config.top_posts_stats_uri.is_empty() {
            let outcome = self.gather_top_posts(&mut result).await;
            result.record(outcome);
        }
        if !self.config.summary_stats_uri.is_empty() {
            let outcome = self.gather_summary(&mut result).await;
            result.record(outcome);
        }
        if !self.config.posts_uri.is_empty() {
            let outcome = self.gather_posts(&mut result).await;
            result.record(outcome);
        }
        if !self.config.tag_stats_uri.is_empty() {
            let outcome = self.gather_tag_stats(&mut result).await;
            result.record(outcome);
        }

        Ok(result)
    }
}
