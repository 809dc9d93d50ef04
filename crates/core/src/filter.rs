//! Filter expressions sent to the inventory backend.
//!
//! Selected tags are grouped by key into an AND of OR-clauses:
//! `{"$and": [{"$or": [{"region": "us-east-1"}, {"region": "us-west-2"}]}, {"$or": [{"type": "s3"}]}]}`.
//! An empty selection produces [`FilterExpression::MatchAll`], which is omitted from requests.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{Resource, Tag};

pub const AND_OPERATOR: &str = "$and";
pub const OR_OPERATOR: &str = "$or";

/// Filter value matching resources where the field is not set.
pub const NULL_VALUE: &str = "(null)";
/// Filter value matching resources where the field is set to anything.
pub const NOT_NULL_VALUE: &str = "(not null)";

/// All values accepted for one field. Values keep selection order and are not deduplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrClause {
    pub key: String,
    pub values: Vec<String>,
}

impl OrClause {
    fn matches(&self, resource: &Resource) -> bool {
        let actual = resource.field(&self.key);
        self.values.iter().any(|v| match v.as_str() {
            NULL_VALUE => actual.is_none(),
            NOT_NULL_VALUE => actual.is_some(),
            _ => actual == Some(v.as_str()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FilterExpression {
    /// No filtering at all.
    #[default]
    MatchAll,
    /// Conjunction of per-field clauses; keys are distinct across clauses.
    And(Vec<OrClause>),
}

impl FilterExpression {
    pub fn is_match_all(&self) -> bool { matches!(self, FilterExpression::MatchAll) }

    pub fn clauses(&self) -> &[OrClause] {
        match self {
            FilterExpression::MatchAll => &[],
            FilterExpression::And(clauses) => clauses,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.clauses().iter().map(|c| c.key.as_str())
    }

    pub fn clause(&self, key: &str) -> Option<&OrClause> {
        self.clauses().iter().find(|c| c.key == key)
    }

    /// Evaluate the expression against a resource with backend semantics.
    pub fn matches(&self, resource: &Resource) -> bool {
        self.clauses().iter().all(|c| c.matches(resource))
    }

    pub fn to_json(&self) -> Value {
        match self {
            FilterExpression::MatchAll => Value::Object(Map::new()),
            FilterExpression::And(clauses) => {
                let and: Vec<Value> = clauses
                    .iter()
                    .map(|c| {
                        let or: Vec<Value> = c
                            .values
                            .iter()
                            .map(|v| {
                                let mut m = Map::with_capacity(1);
                                m.insert(c.key.clone(), Value::String(v.clone()));
                                Value::Object(m)
                            })
                            .collect();
                        let mut m = Map::with_capacity(1);
                        m.insert(OR_OPERATOR.to_string(), Value::Array(or));
                        Value::Object(m)
                    })
                    .collect();
                let mut m = Map::with_capacity(1);
                m.insert(AND_OPERATOR.to_string(), Value::Array(and));
                Value::Object(m)
            }
        }
    }
}

impl Serialize for FilterExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Group tags by key (first appearance order) into an AND of OR-clauses.
///
/// Duplicate pairs are kept as-is; deduplication belongs to the selection set.
pub fn build_filter(tags: &[Tag]) -> FilterExpression {
    if tags.is_empty() {
        return FilterExpression::MatchAll;
    }
    let mut clauses: Vec<OrClause> = Vec::new();
    for tag in tags {
        match clauses.iter_mut().find(|c| c.key == tag.key) {
            Some(clause) => clause.values.push(tag.value.clone()),
            None => clauses.push(OrClause { key: tag.key.clone(), values: vec![tag.value.clone()] }),
        }
    }
    FilterExpression::And(clauses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn t(k: &str, v: &str) -> Tag { Tag::new(k, v) }

    #[test]
    fn groups_by_key_into_one_clause_per_field() {
        let f = build_filter(&[t("region", "us-east-1"), t("region", "us-west-2"), t("type", "s3")]);
        assert_eq!(f.clauses().len(), 2);
        assert_eq!(
            serde_json::to_value(&f).unwrap(),
            json!({"$and": [
                {"$or": [{"region": "us-east-1"}, {"region": "us-west-2"}]},
                {"$or": [{"type": "s3"}]}
            ]})
        );
    }

    #[test]
    fn keeps_first_appearance_order_across_interleaving() {
        let f = build_filter(&[t("type", "s3"), t("region", "a"), t("type", "ec2"), t("region", "b")]);
        let keys: Vec<&str> = f.keys().collect();
        assert_eq!(keys, vec!["type", "region"]);
        assert_eq!(f.clause("type").unwrap().values, vec!["s3", "ec2"]);
        assert_eq!(f.clause("region").unwrap().values, vec!["a", "b"]);
    }

    #[test]
    fn tolerates_duplicates_without_removing_them() {
        let f = build_filter(&[t("region", "a"), t("region", "a")]);
        assert_eq!(f.clause("region").unwrap().values, vec!["a", "a"]);
    }

    #[test]
    fn empty_selection_is_match_all() {
        let f = build_filter(&[]);
        assert!(f.is_match_all());
        assert_eq!(f.to_json(), json!({}));
        // A filter that matches nothing is still a real filter.
        let none = build_filter(&[t("region", "nowhere")]);
        assert!(!none.is_match_all());
        assert!(!none.matches(&Resource::new("s3.Bucket", "b", "us-east-1")));
    }

    #[test]
    fn evaluates_and_of_ors_with_null_sentinels() {
        let r = Resource::new("ec2.Instance", "i-1", "us-east-1").with_tag("team", "infra");
        assert!(build_filter(&[t("region", "eu-west-1"), t("region", "us-east-1")]).matches(&r));
        assert!(!build_filter(&[t("region", "us-east-1"), t("type", "s3.Bucket")]).matches(&r));
        assert!(build_filter(&[t("team", NOT_NULL_VALUE)]).matches(&r));
        assert!(build_filter(&[t("env", NULL_VALUE)]).matches(&r));
        assert!(!build_filter(&[t("team", NULL_VALUE)]).matches(&r));
    }
}
