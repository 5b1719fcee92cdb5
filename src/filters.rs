//! Metadata filter expressions.
//!
//! Callers pass filters as a flat JSON mapping: `{"docset": "docs"}` for
//! exact match, an array value for any-of, and the `__prefix` / `__contains`
//! field suffixes for string matching, e.g. `{"source__prefix": "guide/"}`.
//! Parsing produces a tagged expression with a single interpreter, so the
//! store-side pushdown and the in-process post-filter cannot drift apart:
//! pushdown is a projection of the same clauses, and every branch that
//! re-checks candidates calls the same `matches`.

use serde_json::Value;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOp {
    /// Payload field equals the value.
    Exact(Value),
    /// Payload field equals any of the values.
    OneOf(Vec<Value>),
    /// String form of the payload field starts with the value.
    Prefix(String),
    /// String form of the payload field contains the value.
    Contains(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub field: String,
    pub op: MatchOp,
}

/// A conjunction of clauses; empty means "match everything".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterExpr {
    pub clauses: Vec<FilterClause>,
}

fn scalar_ok(v: &Value) -> bool {
    matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn value_as_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl FilterExpr {
    /// Parse the mapping syntax. Null values, nested objects/arrays, and
    /// empty field names are rejected before any retrieval work happens.
    pub fn parse(filters: &serde_json::Map<String, Value>) -> Result<Self> {
        let mut clauses = Vec::with_capacity(filters.len());

        for (key, value) in filters {
            let (field, suffix) = if let Some(f) = key.strip_suffix("__prefix") {
                (f, Some("prefix"))
            } else if let Some(f) = key.strip_suffix("__contains") {
                (f, Some("contains"))
            } else {
                (key.as_str(), None)
            };

            if field.is_empty() {
                return Err(EngineError::filter(format!("empty field name in '{}'", key)));
            }

            let op = match suffix {
                Some(kind) => {
                    let needle = match value {
                        v if scalar_ok(v) => value_as_string(v),
                        _ => {
                            return Err(EngineError::filter(format!(
                                "'{}' requires a scalar value, got {}",
                                key, value
                            )))
                        }
                    };
                    if kind == "prefix" {
                        MatchOp::Prefix(needle)
                    } else {
                        MatchOp::Contains(needle)
                    }
                }
                None => match value {
                    v if scalar_ok(v) => MatchOp::Exact(v.clone()),
                    Value::Array(items) => {
                        if items.is_empty() || !items.iter().all(scalar_ok) {
                            return Err(EngineError::filter(format!(
                                "'{}' must be a non-empty array of scalars",
                                key
                            )));
                        }
                        MatchOp::OneOf(items.clone())
                    }
                    other => {
                        return Err(EngineError::filter(format!(
                            "unsupported filter value for '{}': {}",
                            key, other
                        )))
                    }
                },
            };

            clauses.push(FilterClause {
                field: field.to_string(),
                op,
            });
        }

        Ok(Self { clauses })
    }

    /// Parse an optional mapping; `None` and `{}` both mean no filtering.
    pub fn parse_opt(filters: Option<&serde_json::Map<String, Value>>) -> Result<Self> {
        match filters {
            Some(map) => Self::parse(map),
            None => Ok(Self::default()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The one interpreter. A clause on a field the payload lacks never
    /// matches; prefix/contains compare against the string form of the
    /// payload value.
    pub fn matches(&self, payload: &Value) -> bool {
        self.clauses.iter().all(|clause| {
            let field_value = match payload.get(&clause.field) {
                Some(v) if !v.is_null() => v,
                _ => return false,
            };
            match &clause.op {
                MatchOp::Exact(expected) => field_value == expected,
                MatchOp::OneOf(options) => options.iter().any(|o| field_value == o),
                MatchOp::Prefix(needle) => value_as_string(field_value).starts_with(needle),
                MatchOp::Contains(needle) => value_as_string(field_value).contains(needle),
            }
        })
    }

    /// Exact/one-of clauses, the subset the vector store can evaluate
    /// server-side during retrieval.
    pub fn pushdown(&self) -> FilterExpr {
        FilterExpr {
            clauses: self
                .clauses
                .iter()
                .filter(|c| matches!(c.op, MatchOp::Exact(_) | MatchOp::OneOf(_)))
                .cloned()
                .collect(),
        }
    }

    /// Whether any clause needs in-process evaluation after retrieval.
    pub fn has_post_clauses(&self) -> bool {
        self.clauses
            .iter()
            .any(|c| matches!(c.op, MatchOp::Prefix(_) | MatchOp::Contains(_)))
    }

    /// The exact value filtered on `field`, when present. Used to find the
    /// docset a query is scoped to.
    pub fn exact_value(&self, field: &str) -> Option<&Value> {
        self.clauses.iter().find_map(|c| {
            if c.field == field {
                match &c.op {
                    MatchOp::Exact(v) => Some(v),
                    _ => None,
                }
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> FilterExpr {
        let map = v.as_object().unwrap().clone();
        FilterExpr::parse(&map).unwrap()
    }

    #[test]
    fn test_exact_match() {
        let expr = parse(json!({"docset": "docs"}));

        assert!(expr.matches(&json!({"docset": "docs", "source": "a.md"})));
        assert!(!expr.matches(&json!({"docset": "other"})));
        assert!(!expr.matches(&json!({"source": "a.md"})), "missing field never matches");
    }

    #[test]
    fn test_array_means_any_of() {
        let expr = parse(json!({"docset": ["docs", "notes"]}));

        assert!(expr.matches(&json!({"docset": "docs"})));
        assert!(expr.matches(&json!({"docset": "notes"})));
        assert!(!expr.matches(&json!({"docset": "wiki"})));
    }

    #[test]
    fn test_prefix_and_contains_suffixes() {
        let expr = parse(json!({
            "source__prefix": "guide/",
            "heading_path__contains": "Setup"
        }));

        assert!(expr.matches(&json!({
            "source": "guide/install.md",
            "heading_path": "Guide > Setup > Linux"
        })));
        assert!(!expr.matches(&json!({
            "source": "api/install.md",
            "heading_path": "Guide > Setup"
        })));
        assert!(!expr.matches(&json!({
            "source": "guide/install.md",
            "heading_path": "Guide > Usage"
        })));
    }

    #[test]
    fn test_clauses_are_a_conjunction() {
        let expr = parse(json!({"docset": "docs", "source": "a.md"}));

        assert!(expr.matches(&json!({"docset": "docs", "source": "a.md"})));
        assert!(!expr.matches(&json!({"docset": "docs", "source": "b.md"})));
    }

    #[test]
    fn test_null_payload_field_never_matches() {
        let expr = parse(json!({"heading_path__contains": "x"}));
        assert!(!expr.matches(&json!({"heading_path": null})));
    }

    #[test]
    fn test_unparseable_filters_rejected() {
        let cases = vec![
            json!({"docset": null}),
            json!({"docset": {"nested": true}}),
            json!({"docset": []}),
            json!({"docset": [["nested"]]}),
            json!({"__prefix": "x"}),
            json!({"source__prefix": ["a", "b"]}),
        ];
        for case in cases {
            let map = case.as_object().unwrap().clone();
            assert!(
                FilterExpr::parse(&map).is_err(),
                "should reject filter {}",
                case
            );
        }
    }

    #[test]
    fn test_pushdown_keeps_only_store_evaluable_clauses() {
        let expr = parse(json!({
            "docset": "docs",
            "lang": ["en", "ko"],
            "source__prefix": "guide/"
        }));
        let pushed = expr.pushdown();

        assert_eq!(pushed.clauses.len(), 2);
        assert!(pushed
            .clauses
            .iter()
            .all(|c| matches!(c.op, MatchOp::Exact(_) | MatchOp::OneOf(_))));
        assert!(expr.has_post_clauses());
        assert!(!pushed.has_post_clauses());
    }

    #[test]
    fn test_exact_value_exposes_docset_scope() {
        let expr = parse(json!({"docset": "docs", "source__prefix": "g/"}));
        assert_eq!(expr.exact_value("docset"), Some(&json!("docs")));
        assert_eq!(expr.exact_value("source"), None);
    }

    #[test]
    fn test_numeric_exact_match() {
        let expr = parse(json!({"chunk_index": 3}));
        assert!(expr.matches(&json!({"chunk_index": 3})));
        assert!(!expr.matches(&json!({"chunk_index": 4})));
    }
}
