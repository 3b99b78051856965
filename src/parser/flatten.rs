use crate::errors::ParseError;
use crate::metric::FieldValue;
use serde_json::Value;
use std::collections::BTreeMap;

/// Walks a decoded JSON tree and collects the leaves worth keeping into a
/// flat field map keyed by `_`-joined paths.
///
/// A leaf is kept when the last `_` segment of its path (the tag-field-key)
/// is one of `tag_keys`. Strings and booleans can additionally be let through
/// unconditionally with [`JsonFlattener::full_flatten`], and numbers with
/// [`JsonFlattener::with_all_numbers`].
#[derive(Debug)]
pub struct JsonFlattener<'a> {
    fields: BTreeMap<String, FieldValue>,
    tag_keys: &'a [String],
    all_numbers: bool,
}

impl<'a> JsonFlattener<'a> {
    pub fn new(tag_keys: &'a [String]) -> Self {
        Self {
            fields: BTreeMap::new(),
            tag_keys,
            all_numbers: false,
        }
    }

    /// Keep every numeric leaf, allow-listed or not.
    pub fn with_all_numbers(mut self, all_numbers: bool) -> Self {
        self.all_numbers = all_numbers;
        self
    }

    /// Flatten keeping only allow-listed leaves of every type.
    pub fn flatten(&mut self, fieldname: &str, value: &Value) -> Result<(), ParseError> {
        self.full_flatten(fieldname, value, false, false)
    }

    /// Flatten, keeping every string leaf when `convert_strings` is set and
    /// every boolean leaf when `convert_bools` is set. Numbers need an
    /// allow-listed key unless the flattener keeps all numbers.
    pub fn full_flatten(
        &mut self,
        fieldname: &str,
        value: &Value,
        convert_strings: bool,
        convert_bools: bool,
    ) -> Result<(), ParseError> {
        let fieldname = fieldname.trim_matches('_');
        let tag_field_key = fieldname.rsplit('_').next().unwrap_or(fieldname);
        let allowed = self.tag_keys.iter().any(|k| k == tag_field_key);

        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    self.full_flatten(
                        &format!("{fieldname}_{k}_"),
                        v,
                        convert_strings,
                        convert_bools,
                    )?;
                }
            }
            Value::Array(items) => {
                for (i, v) in items.iter().enumerate() {
                    self.full_flatten(
                        &format!("{fieldname}_{i}_"),
                        v,
                        convert_strings,
                        convert_bools,
                    )?;
                }
            }
            Value::Number(n) => {
                let f = n.as_f64().ok_or_else(|| ParseError::UnexpectedType {
                    path: fieldname.to_string(),
                    value: n.to_string(),
                })?;
                if allowed || self.all_numbers {
                    self.fields.insert(fieldname.to_string(), FieldValue::Float(f));
                }
            }
            Value::String(s) => {
                if convert_strings || allowed {
                    self.fields
                        .insert(fieldname.to_string(), FieldValue::String(s.clone()));
                }
            }
            Value::Bool(b) => {
                if convert_bools || allowed {
                    self.fields.insert(fieldname.to_string(), FieldValue::Bool(*b));
                }
            }
            Value::Null => {}
        }
        Ok(())
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, FieldValue> {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_nested_numeric_allow_listed() {
        let tag_keys = keys(&["count"]);
        let mut f = JsonFlattener::new(&tag_keys);
        f.flatten("", &json!({"nested": {"count": 5}})).unwrap();
        assert_eq!(f.fields().len(), 1);
        assert_eq!(f.fields()["nested_count"], FieldValue::Float(5.0));
    }

    #[test]
    fn test_numeric_not_allow_listed_is_dropped() {
        let tag_keys = keys(&[]);
        let mut f = JsonFlattener::new(&tag_keys);
        f.flatten("", &json!({"a": 1, "b": {"c": 2.5}})).unwrap();
        assert!(f.fields().is_empty());
    }

    #[test]
    fn test_tag_field_key_is_last_underscore_segment() {
        // "stargazers_count" ends in "count", so it matches the allow-list
        let tag_keys = keys(&["count"]);
        let mut f = JsonFlattener::new(&tag_keys);
        f.flatten("", &json!({"stargazers_count": 7, "size": 3})).unwrap();
        assert_eq!(f.fields()["stargazers_count"], FieldValue::Float(7.0));
        assert!(!f.fields().contains_key("size"));
    }

    #[test]
    fn test_array_indices_become_path_segments() {
        let tag_keys = keys(&["id"]);
        let mut f = JsonFlattener::new(&tag_keys);
        f.flatten("", &json!({"items": [{"id": "A"}, {"id": "B"}]}))
            .unwrap();
        assert_eq!(f.fields()["items_0_id"], FieldValue::from("A"));
        assert_eq!(f.fields()["items_1_id"], FieldValue::from("B"));
        assert_eq!(f.fields().len(), 2);
    }

    #[test]
    fn test_basic_mode_drops_strings_and_bools() {
        let tag_keys = keys(&["views"]);
        let mut f = JsonFlattener::new(&tag_keys);
        f.flatten(
            "",
            &json!({"title": "Foo", "video_play": false, "views": 16}),
        )
        .unwrap();
        assert_eq!(f.fields().len(), 1);
        assert_eq!(f.fields()["views"], FieldValue::Float(16.0));
    }

    #[test]
    fn test_full_mode_keeps_strings_and_bools() {
        let tag_keys = keys(&[]);
        let mut f = JsonFlattener::new(&tag_keys);
        f.full_flatten(
            "",
            &json!({"title": "Foo", "video_play": false, "views": 16}),
            true,
            true,
        )
        .unwrap();
        assert_eq!(f.fields()["title"], FieldValue::from("Foo"));
        assert_eq!(f.fields()["video_play"], FieldValue::Bool(false));
        // numbers still need the allow-list
        assert!(!f.fields().contains_key("views"));
    }

    #[test]
    fn test_full_mode_switches_are_independent() {
        let tag_keys = keys(&[]);
        let mut f = JsonFlattener::new(&tag_keys);
        f.full_flatten("", &json!({"s": "x", "b": true}), false, true)
            .unwrap();
        assert!(!f.fields().contains_key("s"));
        assert_eq!(f.fields()["b"], FieldValue::Bool(true));
    }

    #[test]
    fn test_all_numbers_ignores_allow_list_for_numbers_only() {
        let tag_keys = keys(&["screen_name"]);
        let mut f = JsonFlattener::new(&tag_keys).with_all_numbers(true);
        f.flatten(
            "",
            &json!({"retweet_count": 3, "text": "hi", "user": {"followers_count": 10, "screen_name": "a"}}),
        )
        .unwrap();
        assert_eq!(f.fields()["retweet_count"], FieldValue::Float(3.0));
        assert_eq!(f.fields()["user_followers_count"], FieldValue::Float(10.0));
        assert_eq!(f.fields()["user_screen_name"], FieldValue::from("a"));
        assert!(!f.fields().contains_key("text"));
    }

    #[test]
    fn test_nulls_are_skipped() {
        let tag_keys = keys(&["gone"]);
        let mut f = JsonFlattener::new(&tag_keys);
        f.flatten("", &json!({"gone": null, "list": [null]})).unwrap();
        assert!(f.fields().is_empty());
    }

    #[test]
    fn test_prefix_underscores_are_trimmed() {
        let tag_keys = keys(&["x"]);
        let mut f = JsonFlattener::new(&tag_keys);
        f.flatten("__outer__", &json!({"x": 1})).unwrap();
        assert_eq!(f.fields()["outer_x"], FieldValue::Float(1.0));
    }

    #[test]
    fn test_flatten_is_repeatable() {
        let tag_keys = keys(&["count", "id"]);
        let value = json!({"a": {"count": 1, "id": "z"}, "b": [{"count": 2}]});

        let mut first = JsonFlattener::new(&tag_keys);
        first.flatten("", &value).unwrap();
        let mut second = JsonFlattener::new(&tag_keys);
        second.flatten("", &value).unwrap();

        assert_eq!(first.into_fields(), second.into_fields());
    }
}
