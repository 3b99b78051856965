use crate::errors::ParseError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// A single field value carried by a [`Metric`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    String(String),
    Bool(bool),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

/// One flattened measurement: name, tag set, field set and capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    name: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp: DateTime<Utc>,
}

impl Metric {
    /// Build a metric, rejecting an empty name or empty tag/field keys.
    pub fn new(
        name: impl Into<String>,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, FieldValue>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ParseError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ParseError::MetricConstruction {
                reason: "missing measurement name".into(),
            });
        }
        if tags.keys().any(|k| k.is_empty()) {
            return Err(ParseError::MetricConstruction {
                reason: format!("{name}: empty tag key"),
            });
        }
        if fields.keys().any(|k| k.is_empty()) {
            return Err(ParseError::MetricConstruction {
                reason: format!("{name}: empty field key"),
            });
        }

        Ok(Self {
            name,
            tags,
            fields,
            timestamp,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Insert a tag only when the metric does not already carry that key.
    pub fn add_tag_if_absent(&mut self, key: &str, value: &str) {
        if !self.tags.contains_key(key) {
            self.tags.insert(key.to_string(), value.to_string());
        }
    }

    pub fn add_field(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Move the field map out, leaving the metric with no fields.
    pub fn take_fields(&mut self) -> BTreeMap<String, FieldValue> {
        std::mem::take(&mut self.fields)
    }

    /// Render as one line of influx line protocol, or `None` when there are
    /// no fields (a line without fields is not valid protocol).
    pub fn to_line(&self) -> Option<String> {
        if self.fields.is_empty() {
            return None;
        }
        Some(self.to_string())
    }
}

const NAME_SPECIAL: &[char] = &[',', ' '];
const KEY_SPECIAL: &[char] = &[',', '=', ' '];

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&escape(&self.name, NAME_SPECIAL))?;
        // the protocol has no representation for an empty tag value
        for (k, v) in self.tags.iter().filter(|(_, v)| !v.is_empty()) {
            write!(
                f,
                ",{}={}",
                escape(k, KEY_SPECIAL),
                escape(v, KEY_SPECIAL)
            )?;
        }

        let mut sep = ' ';
        for (k, v) in &self.fields {
            write!(f, "{sep}{}=", escape(k, KEY_SPECIAL))?;
            match v {
                FieldValue::Float(x) => write!(f, "{x}")?,
                FieldValue::Bool(b) => write!(f, "{b}")?,
                FieldValue::String(s) => write!(f, "\"{}\"", quote(s))?,
            }
            sep = ',';
        }

        let nanos = self
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.timestamp.timestamp_micros() * 1000);
        write!(f, " {nanos}")
    }
}

/// Escape a measurement, tag or field key. Line breaks and tabs are written
/// as `\n`, `\r`, `\t` so one metric always stays on one line.
fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0c' => out.push_str("\\f"),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Escape the inside of a double-quoted string field value.
fn quote(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_opt(1_517_849_912, 0).unwrap()
    }

    #[test]
    fn test_new_rejects_empty_name() {
        let err = Metric::new("", BTreeMap::new(), BTreeMap::new(), ts()).unwrap_err();
        assert!(matches!(err, ParseError::MetricConstruction { .. }));
    }

    #[test]
    fn test_new_rejects_empty_field_key() {
        let mut fields = BTreeMap::new();
        fields.insert(String::new(), FieldValue::Float(1.0));
        assert!(Metric::new("m", BTreeMap::new(), fields, ts()).is_err());
    }

    #[test]
    fn test_new_rejects_empty_tag_key() {
        let mut tags = BTreeMap::new();
        tags.insert(String::new(), "v".to_string());
        assert!(Metric::new("m", tags, BTreeMap::new(), ts()).is_err());
    }

    #[test]
    fn test_line_protocol_rendering() {
        let mut tags = BTreeMap::new();
        tags.insert("id".to_string(), "8516".to_string());
        let mut fields = BTreeMap::new();
        fields.insert("views".to_string(), FieldValue::Float(16.0));
        fields.insert("video_play".to_string(), FieldValue::Bool(false));
        fields.insert("title".to_string(), FieldValue::from("Foo \"bar\""));
        let m = Metric::new("wordpress_topposts", tags, fields, ts()).unwrap();

        assert_eq!(
            m.to_line().unwrap(),
            "wordpress_topposts,id=8516 title=\"Foo \\\"bar\\\"\",video_play=false,views=16 1517849912000000000"
        );
    }

    #[test]
    fn test_line_protocol_escapes_tag_values() {
        let mut tags = BTreeMap::new();
        tags.insert("name".to_string(), "Tag A,b=c".to_string());
        let mut fields = BTreeMap::new();
        fields.insert("views".to_string(), FieldValue::Float(0.5));
        let m = Metric::new("my metric", tags, fields, ts()).unwrap();
        assert_eq!(
            m.to_line().unwrap(),
            "my\\ metric,name=Tag\\ A\\,b\\=c views=0.5 1517849912000000000"
        );
    }

    #[test]
    fn test_no_fields_renders_nothing() {
        let m = Metric::new("m", BTreeMap::new(), BTreeMap::new(), ts()).unwrap();
        assert!(m.to_line().is_none());
    }

    #[test]
    fn test_line_breaks_stay_on_one_line() {
        let mut tags = BTreeMap::new();
        tags.insert("title".to_string(), "line one\nline two".to_string());
        let mut fields = BTreeMap::new();
        fields.insert("a\nb_count".to_string(), FieldValue::Float(1.0));
        fields.insert("tab\tkey".to_string(), FieldValue::Float(2.0));
        let m = Metric::new("m\r", tags, fields, ts()).unwrap();

        let line = m.to_line().unwrap();
        assert!(!line.contains('\n'));
        assert!(!line.contains('\r'));
        assert!(!line.contains('\t'));
        assert_eq!(
            line,
            "m\\r,title=line\\ one\\nline\\ two a\\nb_count=1,tab\\tkey=2 1517849912000000000"
        );
    }

    #[test]
    fn test_empty_tag_value_is_omitted() {
        let mut tags = BTreeMap::new();
        tags.insert("id".to_string(), String::new());
        tags.insert("env".to_string(), "ci".to_string());
        let mut fields = BTreeMap::new();
        fields.insert("x_count".to_string(), FieldValue::Float(1.0));
        let m = Metric::new("m", tags, fields, ts()).unwrap();
        assert_eq!(m.to_line().unwrap(), "m,env=ci x_count=1 1517849912000000000");
        // still readable through the accessors
        assert_eq!(m.tag("id"), Some(""));
    }

    #[test]
    fn test_add_tag_if_absent_keeps_existing() {
        let mut m = Metric::new("m", BTreeMap::new(), BTreeMap::new(), ts()).unwrap();
        m.add_tag("host", "a");
        m.add_tag_if_absent("host", "b");
        m.add_tag_if_absent("region", "eu");
        assert_eq!(m.tag("host"), Some("a"));
        assert_eq!(m.tag("region"), Some("eu"));
    }
}
