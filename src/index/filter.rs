//! The typed filter DSL the state index's `get` takes: conjunction,
//! disjunction, negation, ordering comparisons, substring/like, and
//! JSON-subset containment over a row's flat attribute set.

use serde_json::Value;
use std::cmp::Ordering;

/// A predicate over one row's flattened attribute map.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Matches every row; the identity filter.
    All,
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Le(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    /// Case-sensitive substring match against a string-valued attribute.
    Like(String, String),
    /// `true` if the named attribute is a JSON value that contains
    /// `needle` as a subset: every key/element in `needle` is present
    /// and equal (recursively for nested objects) in the attribute.
    Contains(String, Value),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Filter {
        Filter::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Filter {
        Filter::Or(filters.into_iter().collect())
    }

    pub fn not(self) -> Filter {
        Filter::Not(Box::new(self))
    }

    /// Evaluates this filter against a row's attribute object.
    pub fn eval(&self, attrs: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, v) => field_value(attrs, field) == Some(v),
            Filter::Ne(field, v) => field_value(attrs, field) != Some(v),
            Filter::Lt(field, v) => compare(attrs, field, v) == Some(Ordering::Less),
            Filter::Le(field, v) => {
                matches!(compare(attrs, field, v), Some(Ordering::Less) | Some(Ordering::Equal))
            }
            Filter::Gt(field, v) => compare(attrs, field, v) == Some(Ordering::Greater),
            Filter::Ge(field, v) => matches!(
                compare(attrs, field, v),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            Filter::Like(field, needle) => field_value(attrs, field)
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(needle.as_str())),
            Filter::Contains(field, needle) => field_value(attrs, field)
                .map(|hay| json_contains(hay, needle))
                .unwrap_or(false),
            Filter::And(fs) => fs.iter().all(|f| f.eval(attrs)),
            Filter::Or(fs) => fs.iter().any(|f| f.eval(attrs)),
            Filter::Not(f) => !f.eval(attrs),
        }
    }
}

fn field_value<'a>(attrs: &'a Value, field: &str) -> Option<&'a Value> {
    attrs.get(field)
}

fn compare(attrs: &Value, field: &str, rhs: &Value) -> Option<Ordering> {
    let lhs = field_value(attrs, field)?;
    value_cmp(lhs, rhs)
}

fn value_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// `true` if every key (object) or element (array) of `needle` is
/// present and `json_contains`-equal in `haystack`; scalars compare by
/// equality.
fn json_contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Object(hay), Value::Object(need)) => need
            .iter()
            .all(|(k, v)| hay.get(k).is_some_and(|hv| json_contains(hv, v))),
        (Value::Array(hay), Value::Array(need)) => {
            need.iter().all(|n| hay.iter().any(|h| json_contains(h, n)))
        }
        _ => haystack == needle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_and_ordering_compare_on_named_field() {
        let row = json!({"size": 10, "name": "foo"});
        assert!(Filter::Eq("name".into(), json!("foo")).eval(&row));
        assert!(Filter::Gt("size".into(), json!(5)).eval(&row));
        assert!(!Filter::Lt("size".into(), json!(5)).eval(&row));
    }

    #[test]
    fn like_matches_substring() {
        let row = json!({"oid": "backup-2024-01"});
        assert!(Filter::Like("oid".into(), "2024".into()).eval(&row));
        assert!(!Filter::Like("oid".into(), "2025".into()).eval(&row));
    }

    #[test]
    fn contains_checks_json_subset() {
        let row = json!({"tags": {"a": 1, "b": 2}});
        assert!(Filter::Contains("tags".into(), json!({"a": 1})).eval(&row));
        assert!(!Filter::Contains("tags".into(), json!({"a": 2})).eval(&row));
    }

    #[test]
    fn and_or_not_compose() {
        let row = json!({"size": 10, "locked": false});
        let f = Filter::and([
            Filter::Gt("size".into(), json!(1)),
            Filter::Eq("locked".into(), json!(false)).not().not(),
        ]);
        assert!(f.eval(&row));
        assert!(!Filter::Eq("locked".into(), json!(true)).eval(&row));
    }
}
