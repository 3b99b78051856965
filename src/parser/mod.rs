//! JSON-to-metric parser.
//!
//! A payload is either one JSON object or an array of them; every top-level
//! object becomes exactly one [`Metric`]. Configured tag keys are lifted out
//! of each object's top level into tags, then the remainder is flattened
//! into `_`-joined field paths by [`JsonFlattener`].

pub mod flatten;

pub use flatten::JsonFlattener;

use crate::errors::ParseError;
use crate::metric::Metric;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Which non-numeric leaves survive flattening.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlattenMode {
    /// Strings and booleans only when their key is allow-listed.
    #[default]
    Basic,
    /// Strings and booleans always.
    Full,
    /// Every number; strings and booleans as in `Basic`.
    Numeric,
}

/// Metrics from one payload, plus the elements of an array payload that
/// were skipped because they could not be turned into a metric.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub metrics: Vec<Metric>,
    pub errors: Vec<ParseError>,
}

impl ParsedBatch {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct JsonLiteParser {
    metric_name: String,
    tag_keys: Vec<String>,
    default_tags: BTreeMap<String, String>,
    mode: FlattenMode,
}

impl JsonLiteParser {
    pub fn new(
        metric_name: impl Into<String>,
        tag_keys: Vec<String>,
        default_tags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            tag_keys,
            default_tags,
            mode: FlattenMode::Basic,
        }
    }

    pub fn with_mode(mut self, mode: FlattenMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn set_default_tags(&mut self, tags: BTreeMap<String, String>) {
        self.default_tags = tags;
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Parse a payload into metrics.
    ///
    /// A payload that fails to decode is an error. For array payloads, an
    /// element that decodes but cannot become a metric is skipped and its
    /// error is kept in [`ParsedBatch::errors`]; a bare object that cannot
    /// become a metric is returned as the error.
    pub fn parse(&self, buf: &[u8]) -> Result<ParsedBatch, ParseError> {
        let buf = buf.trim_ascii();
        let mut batch = ParsedBatch::default();
        if buf.is_empty() {
            return Ok(batch);
        }

        if is_array(buf) {
            let items: Vec<Option<Map<String, Value>>> =
                serde_json::from_slice(buf).map_err(|source| ParseError::Decode {
                    context: "unable to parse as JSON array",
                    source,
                })?;
            for item in items {
                if let Err(e) = self.parse_object(&mut batch.metrics, item.unwrap_or_default()) {
                    batch.errors.push(e);
                }
            }
        } else {
            let object: Option<Map<String, Value>> =
                serde_json::from_slice(buf).map_err(|source| ParseError::Decode {
                    context: "unable to parse as JSON",
                    source,
                })?;
            self.parse_object(&mut batch.metrics, object.unwrap_or_default())?;
        }

        Ok(batch)
    }

    /// Parse a single line and return its first metric.
    pub fn parse_line(&self, line: &str) -> Result<Metric, ParseError> {
        let mut batch = self.parse(format!("{line}\n").as_bytes())?;
        if batch.metrics.is_empty() {
            return Err(batch.errors.pop().unwrap_or_else(|| ParseError::EmptyLine {
                line: line.to_string(),
            }));
        }
        Ok(batch.metrics.swap_remove(0))
    }

    /// Turn one decoded top-level object into a metric appended to `metrics`.
    pub fn parse_object(
        &self,
        metrics: &mut Vec<Metric>,
        mut object: Map<String, Value>,
    ) -> Result<(), ParseError> {
        let tags = build_tags(&self.default_tags, &self.tag_keys, &mut object);

        let mut flattener = JsonFlattener::new(&self.tag_keys)
            .with_all_numbers(self.mode == FlattenMode::Numeric);
        let root = Value::Object(object);
        match self.mode {
            FlattenMode::Basic | FlattenMode::Numeric => flattener.flatten("", &root)?,
            FlattenMode::Full => flattener.full_flatten("", &root, true, true)?,
        }

        let metric = Metric::new(
            self.metric_name.as_str(),
            tags,
            flattener.into_fields(),
            Utc::now(),
        )?;
        metrics.push(metric);
        Ok(())
    }
}

/// Start from `default_tags` and overlay every configured tag key found at
/// the top level of `object`. Each configured key is removed from `object`,
/// found or not, so it is never flattened into a field.
pub fn build_tags(
    default_tags: &BTreeMap<String, String>,
    tag_keys: &[String],
    object: &mut Map<String, Value>,
) -> BTreeMap<String, String> {
    let mut tags = default_tags.clone();
    for key in tag_keys {
        if let Some(value) = object.remove(key).as_ref().and_then(tag_value) {
            tags.insert(key.clone(), value);
        }
    }
    tags
}

fn tag_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => n.as_f64().map(|f| f.to_string()),
        _ => None,
    }
}

/// Cheap array/object discrimination: the payload is an array when a `[`
/// appears before the first `{`, or when there is no `{` at all.
///
/// This scans raw bytes, so a leading string literal containing `{` before
/// the real `[` is taken for an object.
pub fn is_array(buf: &[u8]) -> bool {
    let open_bracket = buf.iter().position(|&b| b == b'[');
    let open_brace = buf.iter().position(|&b| b == b'{');
    match (open_bracket, open_brace) {
        (Some(ia), Some(ib)) => ia < ib,
        (Some(_), None) => true,
        _ => false,
    }
}
