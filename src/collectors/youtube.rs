use super::http::{HttpFetcher, HttpOptions};
use super::{measurement_name, CollectionResult, Collector};
use crate::errors::CollectorError;
use crate::metric::{FieldValue, Metric};
use crate::parser::{FlattenMode, JsonLiteParser};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct YoutubeConfig {
    #[serde(default)]
    pub name: String,
    /// playlistItems endpoint including `playlistId`; `&key=` is appended.
    pub playlist_items_uri: String,
    /// videos endpoint with `part=statistics`; `&id=` and `&key=` are appended.
    pub video_statistics_uri: String,
    #[serde(default)]
    pub api_key: String,
    /// Must include `videoId` for the playlist walk to find any videos.
    #[serde(default)]
    pub tag_keys: Vec<String>,
    #[serde(default)]
    pub mode: FlattenMode,
    #[serde(flatten)]
    pub http: HttpOptions,
}

/// Statistics for every video in a playlist: one request for the playlist,
/// then one per video found in it.
pub struct YoutubeCollector {
    config: YoutubeConfig,
    fetcher: HttpFetcher,
    parser: JsonLiteParser,
}

impl YoutubeCollector {
    pub fn new(config: YoutubeConfig) -> Result<Self, CollectorError> {
        let fetcher = config.http.fetcher()?;
        let parser = JsonLiteParser::new(
            measurement_name("youtube", &config.name),
            config.tag_keys.clone(),
            BTreeMap::new(),
        )
        .with_mode(config.mode);
        Ok(Self {
            config,
            fetcher,
            parser,
        })
    }

    /// Skipped playlist elements are recorded in `result`.
    async fn video_ids(
        &self,
        result: &mut CollectionResult,
    ) -> Result<Vec<String>, CollectorError> {
        let url = format!("{}&key={}", self.config.playlist_items_uri, self.config.api_key);
        let fetched = self.fetcher.fetch(&url).await?;
        let playlist = self.parser.parse(fetched.body.as_bytes())?;
        let ids = playlist
            .metrics
            .first()
            .map(playlist_video_ids)
            .unwrap_or_default();
        result
            .errors
            .extend(playlist.errors.into_iter().map(CollectorError::Parse));
        Ok(ids)
    }

    async fn gather_video(
        &self,
        video_id: &str,
        result: &mut CollectionResult,
    ) -> Result<(), CollectorError> {
        let url = format!(
            "{}&id={}&key={}",
            self.config.video_statistics_uri, video_id, self.config.api_key
        );
        let fetched = self.fetcher.fetch(&url).await?;
        let mut batch = self.parser.parse(fetched.body.as_bytes())?;
        for metric in &mut batch.metrics {
            convert_counts(metric)?;
        }
        result.absorb(batch);
        Ok(())
    }
}

/// Every string field whose key ends in `videoId`.
fn playlist_video_ids(metric: &Metric) -> Vec<String> {
    metric
        .fields()
        .iter()
        .filter(|(k, _)| k.ends_with("videoId"))
        .filter_map(|(_, v)| v.as_str().map(str::to_string))
        .collect()
}

/// Statistics counts arrive as strings; turn every `*Count` field into a float.
fn convert_counts(metric: &mut Metric) -> Result<(), CollectorError> {
    let fields = metric.take_fields();
    for (k, v) in fields {
        let v = match v {
            FieldValue::String(raw) if k.ends_with("Count") => {
                let parsed = raw
                    .parse::<f64>()
                    .map_err(|_| CollectorError::FieldConversion {
                        field: k.clone(),
                        raw: raw.clone(),
                    })?;
                FieldValue::Float(parsed)
            }
            other => other,
        };
        metric.add_field(k, v);
    }
    Ok(())
}

#[async_trait]
impl Collector for YoutubeCollector {
    fn name(&self) -> &'static str {
        "youtube"
    }

    async fn collect(&self) -> Result<CollectionResult, CollectorError> {
        let mut result = CollectionResult::new(self.name());
        let video_ids = self.video_ids(&mut result).await?;
        tracing::debug!(videos = video_ids.len(), "youtube playlist walked");

        for video_id in &video_ids {
            let outcome = self.gather_video(video_id, &mut result).await;
            result.record(outcome);
        }
        Ok(result)
    }
}
