//! Annotation rule matching.
//!
//! A rule set is a list of clauses. A record passes when any clause matches;
//! a clause matches when the record carries every listed attribute with every
//! listed value.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::sync::types::Annotation;

/// One AND-group: attribute id -> values that must all be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationClause(pub BTreeMap<u64, BTreeSet<u64>>);

impl AnnotationClause {
    pub fn new<I, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (u64, V)>,
        V: IntoIterator<Item = u64>,
    {
        Self(
            entries
                .into_iter()
                .map(|(k, vs)| (k, vs.into_iter().collect()))
                .collect(),
        )
    }

    fn matches(&self, present: &HashMap<u64, HashSet<u64>>) -> bool {
        self.0.iter().all(|(attr, required)| match present.get(attr) {
            Some(values) => required.iter().all(|v| values.contains(v)),
            None => false,
        })
    }
}

/// OR-combined clauses. Empty means "accept everything".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRules(pub Vec<AnnotationClause>);

impl AnnotationRules {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the free-form configuration string.
    ///
    /// Accepts a JSON object (`{"22": ["24", "25"], "1": ["2"]}`, one clause per
    /// entry) or a JSON array of such objects (one clause per object). Ids may be
    /// numbers or numeric strings. Blank input yields no rules.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        let v: serde_json::Value =
            serde_json::from_str(s).context("annotation rules are not valid JSON")?;
        match v {
            serde_json::Value::Object(map) => {
                let mut clauses = Vec::with_capacity(map.len());
                for (k, vals) in map {
                    let mut one = serde_json::Map::new();
                    one.insert(k, vals);
                    clauses.push(parse_clause(&one)?);
                }
                Ok(Self(clauses))
            }
            serde_json::Value::Array(items) => items
                .iter()
                .map(|it| match it {
                    serde_json::Value::Object(map) => parse_clause(map),
                    other => Err(anyhow!("annotation clause must be an object, got {other}")),
                })
                .collect::<Result<Vec<_>>>()
                .map(Self),
            other => Err(anyhow!(
                "annotation rules must be an object or array, got {other}"
            )),
        }
    }
}

fn parse_clause(map: &serde_json::Map<String, serde_json::Value>) -> Result<AnnotationClause> {
    let mut clause = BTreeMap::new();
    for (k, vals) in map {
        let attr: u64 = k
            .trim()
            .parse()
            .with_context(|| format!("annotation attribute id {k:?}"))?;
        let list = vals
            .as_array()
            .ok_or_else(|| anyhow!("values for attribute {attr} must be a list"))?;
        let mut set = BTreeSet::new();
        for v in list {
            set.insert(parse_id(v).with_context(|| format!("value for attribute {attr}"))?);
        }
        clause.insert(attr, set);
    }
    Ok(AnnotationClause(clause))
}

fn parse_id(v: &serde_json::Value) -> Result<u64> {
    match v {
        serde_json::Value::Number(n) => {
            n.as_u64().ok_or_else(|| anyhow!("id {n} is not a u64"))
        }
        serde_json::Value::String(s) => {
            s.trim().parse().map_err(|_| anyhow!("id {s:?} is not numeric"))
        }
        other => Err(anyhow!("unexpected id {other}")),
    }
}

/// Group a record's annotations by attribute id.
pub fn annotation_map(annotations: &[Annotation]) -> HashMap<u64, HashSet<u64>> {
    let mut out: HashMap<u64, HashSet<u64>> = HashMap::new();
    for a in annotations {
        out.entry(a.controlled_attribute_id)
            .or_default()
            .insert(a.controlled_value_id);
    }
    out
}

pub fn matches(annotations: &[Annotation], rules: &AnnotationRules) -> bool {
    if rules.is_empty() {
        return true;
    }
    let present = annotation_map(annotations);
    rules.0.iter().any(|clause| clause.matches(&present))
}
