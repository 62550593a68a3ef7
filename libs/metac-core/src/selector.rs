//! The selector evaluator (spec.md §4.3, C3): decides whether a candidate
//! target matches a user-supplied set of selector terms.
//!
//! Within a term the five sub-expression groups are ANDed (an empty group is
//! vacuously true); across terms, results are ORed (an empty term list is
//! vacuously true). An empty key or a malformed operator fails the *term*
//! with an error, distinct from the term simply not matching.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Sentinel a missing target field is coerced to before a reference
/// comparison, so that "absent" never accidentally equals an empty string
/// on the reference side (spec.md §4.3).
const NOT_FOUND_SENTINEL: &str = "\u{0}metac-selector-not-found\u{0}";

/// The four Kubernetes label-selector operators, reused for labels,
/// annotations, and fields (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LabelOperator {
    In(Vec<String>),
    NotIn(Vec<String>),
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LabelRequirement {
    pub key: String,
    pub operator: LabelOperator,
}

/// Operators available to slice (string-array) field requirements —
/// extending the base four with set and count comparisons (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SliceOperator {
    Equals(Vec<String>),
    NotEquals(Vec<String>),
    ContainsAny(Vec<String>),
    ContainsAll(Vec<String>),
    ContainsNone(Vec<String>),
    CountEquals(usize),
    CountGt(usize),
    CountLt(usize),
    NotCountEquals(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SliceRequirement {
    pub key: String,
    pub operator: SliceOperator,
}

/// Reference-comparison operators: the three named special cases
/// short-circuit to the reference object's metadata; `Equals`/`NotEquals`
/// compare `key` on the target against the same `key` on the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceOperator {
    EqualsName,
    EqualsUID,
    EqualsNamespace,
    Equals,
    NotEquals,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReferenceRequirement {
    pub key: String,
    pub operator: ReferenceOperator,
}

/// One selector term: five optional, independently-ANDed sub-expressions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectorTerm {
    pub match_labels: BTreeMap<String, String>,
    pub match_label_expressions: Vec<LabelRequirement>,
    pub match_annotations: BTreeMap<String, String>,
    pub match_annotation_expressions: Vec<LabelRequirement>,
    pub match_fields: BTreeMap<String, String>,
    pub match_field_expressions: Vec<LabelRequirement>,
    pub match_slice: BTreeMap<String, Vec<String>>,
    pub match_slice_expressions: Vec<SliceRequirement>,
    /// Dotted paths compared for plain equality between target and reference.
    pub match_reference: Vec<String>,
    pub match_reference_expressions: Vec<ReferenceRequirement>,
}

/// An ORed list of [`SelectorTerm`]s — an empty list matches everything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SelectorTermList(pub Vec<SelectorTerm>);

impl SelectorTermList {
    pub fn new(terms: Vec<SelectorTerm>) -> Self {
        Self(terms)
    }

    /// Evaluates the term list against `target`, with an optional
    /// `reference` object for the reference sub-expressions.
    pub fn matches(&self, target: &Value, reference: Option<&Value>) -> Result<bool> {
        if self.0.is_empty() {
            return Ok(true);
        }
        for term in &self.0 {
            if term.matches(target, reference)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl SelectorTerm {
    pub fn matches(&self, target: &Value, reference: Option<&Value>) -> Result<bool> {
        Ok(self.labels_match(target)?
            && self.annotations_match(target)?
            && self.fields_match(target)?
            && self.slices_match(target)?
            && self.references_match(target, reference)?)
    }

    fn labels_match(&self, target: &Value) -> Result<bool> {
        let labels = string_map_at(target, "metadata.labels");
        match_map_and_expressions(&self.match_labels, &self.match_label_expressions, &labels)
    }

    fn annotations_match(&self, target: &Value) -> Result<bool> {
        let annotations = string_map_at(target, "metadata.annotations");
        match_map_and_expressions(&self.match_annotations, &self.match_annotation_expressions, &annotations)
    }

    fn fields_match(&self, target: &Value) -> Result<bool> {
        for (key, expected) in &self.match_fields {
            if key.is_empty() {
                return Err(Error::Policy("selector term has an empty field key".to_owned()));
            }
            if get_field_string(target, key).as_deref() != Some(expected.as_str()) {
                return Ok(false);
            }
        }
        for req in &self.match_field_expressions {
            if req.key.is_empty() {
                return Err(Error::Policy("selector term has an empty field key".to_owned()));
            }
            let value = get_field_string(target, &req.key);
            if !evaluate_label_operator(&req.operator, value.as_deref()) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn slices_match(&self, target: &Value) -> Result<bool> {
        for (key, expected) in &self.match_slice {
            if key.is_empty() {
                return Err(Error::Policy("selector term has an empty slice key".to_owned()));
            }
            let actual = get_string_array(target, key);
            if &actual != expected {
                return Ok(false);
            }
        }
        for req in &self.match_slice_expressions {
            if req.key.is_empty() {
                return Err(Error::Policy("selector term has an empty slice key".to_owned()));
            }
            let actual = get_string_array(target, &req.key);
            if !evaluate_slice_operator(&req.operator, &actual) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn references_match(&self, target: &Value, reference: Option<&Value>) -> Result<bool> {
        if self.match_reference.is_empty() && self.match_reference_expressions.is_empty() {
            return Ok(true);
        }
        let reference = match reference {
            Some(r) => r,
            None => return Err(Error::Policy("selector term requires a reference object but none was supplied".to_owned())),
        };
        for key in &self.match_reference {
            if key.is_empty() {
                return Err(Error::Policy("selector term has an empty reference key".to_owned()));
            }
            if get_path(target, key) != get_path(reference, key) {
                return Ok(false);
            }
        }
        for req in &self.match_reference_expressions {
            if req.key.is_empty() {
                return Err(Error::Policy("selector term has an empty reference key".to_owned()));
            }
            if !evaluate_reference_operator(req, target, reference) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn match_map_and_expressions(
    literal: &BTreeMap<String, String>,
    expressions: &[LabelRequirement],
    actual: &BTreeMap<String, String>,
) -> Result<bool> {
    for (key, expected) in literal {
        if key.is_empty() {
            return Err(Error::Policy("selector term has an empty key".to_owned()));
        }
        if actual.get(key) != Some(expected) {
            return Ok(false);
        }
    }
    for req in expressions {
        if req.key.is_empty() {
            return Err(Error::Policy("selector term has an empty key".to_owned()));
        }
        if !evaluate_label_operator(&req.operator, actual.get(&req.key).map(String::as_str)) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn evaluate_label_operator(operator: &LabelOperator, value: Option<&str>) -> bool {
    match operator {
        LabelOperator::In(values) => value.is_some_and(|v| values.iter().any(|x| x == v)),
        LabelOperator::NotIn(values) => !value.is_some_and(|v| values.iter().any(|x| x == v)),
        LabelOperator::Exists => value.is_some(),
        LabelOperator::DoesNotExist => value.is_none(),
    }
}

fn evaluate_slice_operator(operator: &SliceOperator, actual: &[String]) -> bool {
    match operator {
        SliceOperator::Equals(expected) => actual == expected.as_slice(),
        SliceOperator::NotEquals(expected) => actual != expected.as_slice(),
        SliceOperator::ContainsAny(expected) => expected.iter().any(|v| actual.contains(v)),
        SliceOperator::ContainsAll(expected) => expected.iter().all(|v| actual.contains(v)),
        SliceOperator::ContainsNone(expected) => !expected.iter().any(|v| actual.contains(v)),
        SliceOperator::CountEquals(n) => actual.len() == *n,
        SliceOperator::CountGt(n) => actual.len() > *n,
        SliceOperator::CountLt(n) => actual.len() < *n,
        SliceOperator::NotCountEquals(n) => actual.len() != *n,
    }
}

fn evaluate_reference_operator(req: &ReferenceRequirement, target: &Value, reference: &Value) -> bool {
    use crate::unstructured::UnstructuredExt;
    let target_value = get_field_string(target, &req.key).unwrap_or_else(|| NOT_FOUND_SENTINEL.to_owned());
    match req.operator {
        ReferenceOperator::EqualsName => Some(target_value.as_str()) == reference.name(),
        ReferenceOperator::EqualsUID => Some(target_value.as_str()) == reference.uid(),
        ReferenceOperator::EqualsNamespace => Some(target_value.as_str()) == reference.namespace(),
        ReferenceOperator::Equals => get_path(target, &req.key) == get_path(reference, &req.key),
        ReferenceOperator::NotEquals => get_path(target, &req.key) != get_path(reference, &req.key),
    }
}

fn string_map_at(obj: &Value, dotted_path: &str) -> BTreeMap<String, String> {
    get_path(obj, dotted_path)
        .and_then(|v| v.as_object().cloned())
        .map(|map| map.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned()))).collect())
        .unwrap_or_default()
}

fn get_field_string(obj: &Value, dotted_path: &str) -> Option<String> {
    get_path(obj, dotted_path).and_then(|v| v.as_str().map(str::to_owned))
}

fn get_string_array(obj: &Value, dotted_path: &str) -> Vec<String> {
    get_path(obj, dotted_path)
        .and_then(|v| v.as_array().cloned())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default()
}

fn get_path(obj: &Value, dotted_path: &str) -> Option<Value> {
    let mut current = obj;
    for segment in dotted_path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}
