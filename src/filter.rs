use std::cmp::Ordering;
use std::str::FromStr;

use regex::Regex;
use serde_json::Value;

use crate::domain::{Document, is_valid_attribute_path, lookup_candidates};
use crate::error::KiraError;
use crate::sort::compare_json;

#[derive(Debug, Clone)]
pub enum Constraint {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub path: String,
    pub constraint: Constraint,
}

#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<Condition>,
    canonical: String,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(path: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        Self {
            canonical: format!("{path}:{value}"),
            conditions: vec![Condition {
                path: path.to_string(),
                constraint: Constraint::Eq(value),
            }],
        }
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition.matches(doc))
    }

    pub fn from_json(value: &Value) -> Result<Self, KiraError> {
        let object = value
            .as_object()
            .ok_or_else(|| KiraError::InvalidFilter("filter must be a JSON object".to_string()))?;
        let mut conditions = Vec::new();
        for (path, spec) in object {
            if path.starts_with('$') {
                return Err(KiraError::InvalidFilter(format!(
                    "top-level operator `{path}` is not supported"
                )));
            }
            check_path(path)?;
            match spec {
                Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
                    for (op, operand) in ops {
                        conditions.push(Condition {
                            path: path.clone(),
                            constraint: parse_operator(path, op, operand)?,
                        });
                    }
                }
                other => conditions.push(Condition {
                    path: path.clone(),
                    constraint: Constraint::Eq(other.clone()),
                }),
            }
        }
        Ok(Self {
            conditions,
            canonical: value.to_string(),
        })
    }
}

impl FromStr for Filter {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(Self::all());
        }
        let mut conditions = Vec::new();
        for term in trimmed.split(',') {
            let (path, raw) = term.split_once(':').ok_or_else(|| {
                KiraError::InvalidFilter(format!("expected `attribute:value`, got `{}`", term.trim()))
            })?;
            let path = path.trim();
            check_path(path)?;
            conditions.push(Condition {
                path: path.to_string(),
                constraint: parse_compact_constraint(path, raw.trim())?,
            });
        }
        Ok(Self {
            conditions,
            canonical: trimmed.to_string(),
        })
    }
}

impl Condition {
    fn matches(&self, doc: &Document) -> bool {
        let candidates = lookup_candidates(doc, &self.path);
        if let Constraint::Exists(expected) = &self.constraint {
            return candidates.is_empty() != *expected;
        }
        if candidates.is_empty() {
            return false;
        }
        match &self.constraint {
            Constraint::Eq(expected) => candidates.iter().any(|c| json_eq(c, expected)),
            Constraint::Ne(expected) => !candidates.iter().any(|c| json_eq(c, expected)),
            Constraint::Gt(bound) => any_ordered(&candidates, bound, |o| o == Ordering::Greater),
            Constraint::Gte(bound) => any_ordered(&candidates, bound, |o| o != Ordering::Less),
            Constraint::Lt(bound) => any_ordered(&candidates, bound, |o| o == Ordering::Less),
            Constraint::Lte(bound) => any_ordered(&candidates, bound, |o| o != Ordering::Greater),
            Constraint::In(options) => candidates
                .iter()
                .any(|c| options.iter().any(|option| json_eq(c, option))),
            Constraint::Nin(options) => !candidates
                .iter()
                .any(|c| options.iter().any(|option| json_eq(c, option))),
            Constraint::Regex(pattern) => candidates
                .iter()
                .any(|c| c.as_str().is_some_and(|text| pattern.is_match(text))),
            Constraint::Exists(_) => unreachable!("handled above"),
        }
    }
}

fn json_eq(left: &Value, right: &Value) -> bool {
    compare_json(Some(left), Some(right)) == Ordering::Equal
}

/// Range comparisons only hold between values of the same JSON type.
fn any_ordered(candidates: &[&Value], bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    candidates.iter().any(|candidate| {
        same_kind(candidate, bound) && accept(compare_json(Some(candidate), Some(bound)))
    })
}

fn same_kind(left: &Value, right: &Value) -> bool {
    matches!(
        (left, right),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
    )
}

fn check_path(path: &str) -> Result<(), KiraError> {
    if is_valid_attribute_path(path) {
        Ok(())
    } else {
        Err(KiraError::InvalidFilter(format!("invalid attribute `{path}`")))
    }
}

fn parse_compact_constraint(path: &str, raw: &str) -> Result<Constraint, KiraError> {
    if raw.is_empty() {
        return Err(KiraError::InvalidFilter(format!("empty value for `{path}`")));
    }
    if raw == "*" {
        return Ok(Constraint::Exists(true));
    }
    if let Some(rest) = raw.strip_prefix(">=") {
        return Ok(Constraint::Gte(scalar(path, rest)?));
    }
    if let Some(rest) = raw.strip_prefix("<=") {
        return Ok(Constraint::Lte(scalar(path, rest)?));
    }
    if let Some(rest) = raw.strip_prefix('>') {
        return Ok(Constraint::Gt(scalar(path, rest)?));
    }
    if let Some(rest) = raw.strip_prefix('<') {
        return Ok(Constraint::Lt(scalar(path, rest)?));
    }
    if let Some(rest) = raw.strip_prefix('!') {
        return Ok(Constraint::Ne(scalar(path, rest)?));
    }
    if let Some(rest) = raw.strip_prefix('~') {
        return compile_regex(path, rest).map(Constraint::Regex);
    }
    if raw.contains('|') {
        let options = raw
            .split('|')
            .map(|option| scalar(path, option))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Constraint::In(options));
    }
    Ok(Constraint::Eq(scalar(path, raw)?))
}

fn scalar(path: &str, raw: &str) -> Result<Value, KiraError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(KiraError::InvalidFilter(format!("empty value for `{path}`")));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Null | Value::String(_))) => {
            Ok(value)
        }
        _ => Ok(Value::String(raw.to_string())),
    }
}

fn compile_regex(path: &str, pattern: &str) -> Result<Regex, KiraError> {
    Regex::new(pattern)
        .map_err(|err| KiraError::InvalidFilter(format!("bad pattern for `{path}`: {err}")))
}

fn parse_operator(path: &str, op: &str, operand: &Value) -> Result<Constraint, KiraError> {
    let constraint = match op {
        "$eq" => Constraint::Eq(operand.clone()),
        "$ne" => Constraint::Ne(operand.clone()),
        "$gt" => Constraint::Gt(operand.clone()),
        "$gte" => Constraint::Gte(operand.clone()),
        "$lt" => Constraint::Lt(operand.clone()),
        "$lte" => Constraint::Lte(operand.clone()),
        "$in" => Constraint::In(array_operand(path, op, operand)?),
        "$nin" => Constraint::Nin(array_operand(path, op, operand)?),
        "$exists" => Constraint::Exists(operand.as_bool().ok_or_else(|| {
            KiraError::InvalidFilter(format!("`$exists` on `{path}` expects true or false"))
        })?),
        "$regex" => {
            let pattern = operand.as_str().ok_or_else(|| {
                KiraError::InvalidFilter(format!("`$regex` on `{path}` expects a string"))
            })?;
            Constraint::Regex(compile_regex(path, pattern)?)
        }
        other => {
            return Err(KiraError::InvalidFilter(format!(
                "unsupported operator `{other}` on `{path}`"
            )));
        }
    };
    Ok(constraint)
}

fn array_operand(path: &str, op: &str, operand: &Value) -> Result<Vec<Value>, KiraError> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| KiraError::InvalidFilter(format!("`{op}` on `{path}` expects an array")))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn doc(value: Value) -> Document {
        value.as_object().unwrap().clone()
    }

    fn sample() -> Document {
        doc(json!({
            "id": "nmdc:bsm-11-abc",
            "ecosystem": "Environmental",
            "depth": {"value": 12.5},
            "part_of": ["nmdc:sty-11-a", "nmdc:sty-11-b"],
            "samp_name": "Soil core 7",
            "verified": true
        }))
    }

    #[test]
    fn compact_equality_and_ids_with_colons() {
        let filter: Filter = "id:nmdc:bsm-11-abc".parse().unwrap();
        assert!(filter.matches(&sample()));
        let filter: Filter = "ecosystem:Engineered".parse().unwrap();
        assert!(!filter.matches(&sample()));
    }

    #[test]
    fn compact_ranges_respect_types() {
        let doc = sample();
        assert!("depth.value:>=12.5".parse::<Filter>().unwrap().matches(&doc));
        assert!("depth.value:>10,depth.value:<13".parse::<Filter>().unwrap().matches(&doc));
        assert!(!"depth.value:<12".parse::<Filter>().unwrap().matches(&doc));
        // a string bound never orders against a number
        assert!(!"depth.value:>abc".parse::<Filter>().unwrap().matches(&doc));
    }

    #[test]
    fn membership_over_array_fields() {
        let doc = sample();
        assert!("part_of:nmdc:sty-11-b".parse::<Filter>().unwrap().matches(&doc));
        assert!(
            "part_of:nmdc:sty-11-x|nmdc:sty-11-a"
                .parse::<Filter>()
                .unwrap()
                .matches(&doc)
        );
    }

    #[test]
    fn missing_attributes_do_not_match() {
        let doc = sample();
        assert!(!"habitat:*".parse::<Filter>().unwrap().matches(&doc));
        assert!(!"habitat:!soil".parse::<Filter>().unwrap().matches(&doc));
        assert!("samp_name:*".parse::<Filter>().unwrap().matches(&doc));
        let absent = Filter::from_json(&json!({"habitat": {"$exists": false}})).unwrap();
        assert!(absent.matches(&doc));
    }

    #[test]
    fn regex_and_booleans() {
        let doc = sample();
        assert!("samp_name:~^Soil".parse::<Filter>().unwrap().matches(&doc));
        assert!("verified:true".parse::<Filter>().unwrap().matches(&doc));
    }

    #[test]
    fn json_operators() {
        let doc = sample();
        let filter = Filter::from_json(&json!({
            "depth.value": {"$gt": 10, "$lte": 12.5},
            "ecosystem": {"$in": ["Environmental", "Host-associated"]},
            "id": {"$nin": ["nmdc:bsm-11-zzz"]}
        }))
        .unwrap();
        assert!(filter.matches(&doc));
        assert_eq!(filter.conditions().len(), 4);
    }

    #[test]
    fn malformed_filters_are_rejected() {
        assert_matches!("ecosystem".parse::<Filter>(), Err(KiraError::InvalidFilter(_)));
        assert_matches!("bad attr:1".parse::<Filter>(), Err(KiraError::InvalidFilter(_)));
        assert_matches!("name:~(".parse::<Filter>(), Err(KiraError::InvalidFilter(_)));
        assert_matches!("name:".parse::<Filter>(), Err(KiraError::InvalidFilter(_)));
        assert_matches!(
            Filter::from_json(&json!({"$where": "1"})),
            Err(KiraError::InvalidFilter(_))
        );
        assert_matches!(
            Filter::from_json(&json!({"a": {"$near": 1}})),
            Err(KiraError::InvalidFilter(_))
        );
        assert_matches!(Filter::from_json(&json!([1])), Err(KiraError::InvalidFilter(_)));
    }
}
