//! Structured-path redaction over parsed YAML and JSON documents.
//!
//! Paths are dotted segment lists; `*` matches every key of a mapping or
//! every element of a sequence. The value at a matched path is replaced
//! with the sentinel, never removed, so document shape is preserved.

use super::rules::SENTINEL;

/// Apply one path to a YAML document. Returns the number of replacements.
pub fn redact_yaml_path(value: &mut serde_yaml::Value, segments: &[String]) -> u64 {
    let Some((head, rest)) = segments.split_first() else {
        return 0;
    };

    match value {
        serde_yaml::Value::Mapping(map) => {
            let mut count = 0;
            for (key, child) in map.iter_mut() {
                let matched = head == "*"
                    || key.as_str().map(|k| k == head).unwrap_or(false);
                if !matched {
                    continue;
                }
                if rest.is_empty() {
                    if !child.is_null() {
                        *child = serde_yaml::Value::String(SENTINEL.to_string());
                        count += 1;
                    }
                } else {
                    count += redact_yaml_path(child, rest);
                }
            }
            count
        }
        serde_yaml::Value::Sequence(seq) => {
            let mut count = 0;
            for (i, child) in seq.iter_mut().enumerate() {
                let matched = head == "*" || head.parse::<usize>() == Ok(i);
                if !matched {
                    continue;
                }
                if rest.is_empty() {
                    *child = serde_yaml::Value::String(SENTINEL.to_string());
                    count += 1;
                } else {
                    count += redact_yaml_path(child, rest);
                }
            }
            count
        }
        _ => 0,
    }
}

/// Apply one path to a JSON document. Returns the number of replacements.
pub fn redact_json_path(value: &mut serde_json::Value, segments: &[String]) -> u64 {
    let Some((head, rest)) = segments.split_first() else {
        return 0;
    };

    match value {
        serde_json::Value::Object(map) => {
            let mut count = 0;
            for (key, child) in map.iter_mut() {
                if head != "*" && key != head {
                    continue;
                }
                if rest.is_empty() {
                    if !child.is_null() {
                        *child = serde_json::Value::String(SENTINEL.to_string());
                        count += 1;
                    }
                } else {
                    count += redact_json_path(child, rest);
                }
            }
            count
        }
        serde_json::Value::Array(seq) => {
            let mut count = 0;
            for (i, child) in seq.iter_mut().enumerate() {
                let matched = head == "*" || head.parse::<usize>() == Ok(i);
                if !matched {
                    continue;
                }
                if rest.is_empty() {
                    *child = serde_json::Value::String(SENTINEL.to_string());
                    count += 1;
                } else {
                    count += redact_json_path(child, rest);
                }
            }
            count
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(path: &str) -> Vec<String> {
        path.split('.').map(str::to_string).collect()
    }

    #[test]
    fn yaml_path_redacts_nested_value() {
        let mut doc: serde_yaml::Value =
            serde_yaml::from_str("data:\n  password: hunter2\n  host: db\n").unwrap();
        let n = redact_yaml_path(&mut doc, &segs("data.password"));
        assert_eq!(n, 1);
        let rendered = serde_yaml::to_string(&doc).unwrap();
        assert!(rendered.contains("password: '***HIDDEN***'") || rendered.contains("password: \"***HIDDEN***\"") || rendered.contains("password: ***HIDDEN***"));
        assert!(rendered.contains("host: db"));
    }

    #[test]
    fn wildcard_matches_every_sequence_element() {
        let mut doc: serde_json::Value = serde_json::json!({
            "env": [
                {"name": "A", "value": "1"},
                {"name": "B", "value": "2"}
            ]
        });
        let n = redact_json_path(&mut doc, &segs("env.*.value"));
        assert_eq!(n, 2);
        assert_eq!(doc["env"][0]["value"], SENTINEL);
        assert_eq!(doc["env"][1]["value"], SENTINEL);
        assert_eq!(doc["env"][0]["name"], "A");
    }

    #[test]
    fn missing_path_is_a_no_op() {
        let mut doc: serde_json::Value = serde_json::json!({"a": 1});
        assert_eq!(redact_json_path(&mut doc, &segs("b.c")), 0);
        assert_eq!(doc, serde_json::json!({"a": 1}));
    }
}
