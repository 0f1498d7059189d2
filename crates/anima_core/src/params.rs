//! Typed behavioral parameter groups.
//!
//! Both the learning and the adaptation parameter sets are a [`BehaviorParams`]:
//! a struct with one field per group, each group a map from [`ParamKey`] to a
//! value in `[0, 1]`. Group names are fields, not strings, so no caller can
//! smuggle in a new group. Keys go through [`ParamKey::new`] (also on
//! deserialization), which refuses the reserved decision/action vocabulary.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Value a key takes the first time it is observed.
pub const NEUTRAL_VALUE: f64 = 0.5;

/// Words reserved for decision and action control. A key whose name, or any
/// `_`/`-`/`.` separated segment of it, matches one of these cannot exist.
pub const RESERVED_KEYS: &[&str] = &[
    "action",
    "choose",
    "choice",
    "decide",
    "decision",
    "execute",
    "goal",
    "objective",
    "override",
    "policy",
    "reward",
    "score",
    "select",
    "utility",
];

/// A validated parameter key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParamKey(String);

impl ParamKey {
    pub fn new(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        let lowered = trimmed.to_ascii_lowercase();
        let reserved = lowered
            .split(|c: char| c == '_' || c == '-' || c == '.')
            .chain(std::iter::once(lowered.as_str()))
            .any(|segment| RESERVED_KEYS.contains(&segment));
        if reserved {
            return Err(ValidationError::ReservedKey(raw));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ParamKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ParamKey> for String {
    fn from(key: ParamKey) -> Self {
        key.0
    }
}

impl Borrow<str> for ParamKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn check_unit(key: &ParamKey, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFinite {
            field: "parameter value",
            value,
        });
    }
    if !(0.0..=1.0).contains(&value) {
        tracing::debug!(key = %key, value, "rejected parameter value outside [0, 1]");
        return Err(ValidationError::OutOfBounds {
            field: "parameter value",
            value,
            min: 0.0,
            max: 1.0,
        });
    }
    Ok(())
}

/// One parameter group: key → value in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<ParamKey, f64>", into = "BTreeMap<ParamKey, f64>")]
pub struct ParamGroup {
    values: BTreeMap<ParamKey, f64>,
}

impl ParamGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Value for `key`, or [`NEUTRAL_VALUE`] when the key was never set.
    pub fn value_or_neutral(&self, key: &str) -> f64 {
        self.get(key).unwrap_or(NEUTRAL_VALUE)
    }

    /// Set a value. Returns the previous value.
    pub fn set(&mut self, key: ParamKey, value: f64) -> Result<Option<f64>, ValidationError> {
        check_unit(&key, value)?;
        Ok(self.values.insert(key, value))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, f64)> {
        self.values.iter().map(|(k, v)| (k, *v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &ParamKey> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl TryFrom<BTreeMap<ParamKey, f64>> for ParamGroup {
    type Error = ValidationError;

    fn try_from(values: BTreeMap<ParamKey, f64>) -> Result<Self, Self::Error> {
        for (key, value) in &values {
            check_unit(key, *value)?;
        }
        Ok(Self { values })
    }
}

impl From<ParamGroup> for BTreeMap<ParamKey, f64> {
    fn from(group: ParamGroup) -> Self {
        group.values
    }
}

/// Names of the parameter groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamGroupKind {
    /// Per event type: how strongly stimuli of that type register.
    EventTypeSensitivity,
    /// Per event type: tendency to treat that type as significant.
    SignificanceBias,
    /// Per response pattern: how readily the pattern is produced.
    ResponsePreference,
}

impl ParamGroupKind {
    pub const ALL: [ParamGroupKind; 3] = [
        ParamGroupKind::EventTypeSensitivity,
        ParamGroupKind::SignificanceBias,
        ParamGroupKind::ResponsePreference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamGroupKind::EventTypeSensitivity => "event_type_sensitivity",
            ParamGroupKind::SignificanceBias => "significance_bias",
            ParamGroupKind::ResponsePreference => "response_preference",
        }
    }
}

impl fmt::Display for ParamGroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete behavioral parameter set (used for both learning and adaptation).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorParams {
    pub event_type_sensitivity: ParamGroup,
    pub significance_bias: ParamGroup,
    pub response_preference: ParamGroup,
}

/// A single parameter change between two parameter sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamChange {
    pub group: ParamGroupKind,
    pub key: ParamKey,
    /// `None` when the key did not exist before the change.
    pub old: Option<f64>,
    pub new: f64,
}

impl ParamChange {
    /// Signed change, measured from [`NEUTRAL_VALUE`] for new keys.
    pub fn delta(&self) -> f64 {
        self.new - self.old.unwrap_or(NEUTRAL_VALUE)
    }
}

impl BehaviorParams {
    pub fn group(&self, kind: ParamGroupKind) -> &ParamGroup {
        match kind {
            ParamGroupKind::EventTypeSensitivity => &self.event_type_sensitivity,
            ParamGroupKind::SignificanceBias => &self.significance_bias,
            ParamGroupKind::ResponsePreference => &self.response_preference,
        }
    }

    pub fn group_mut(&mut self, kind: ParamGroupKind) -> &mut ParamGroup {
        match kind {
            ParamGroupKind::EventTypeSensitivity => &mut self.event_type_sensitivity,
            ParamGroupKind::SignificanceBias => &mut self.significance_bias,
            ParamGroupKind::ResponsePreference => &mut self.response_preference,
        }
    }

    pub fn get(&self, kind: ParamGroupKind, key: &str) -> Option<f64> {
        self.group(kind).get(key)
    }

    /// All `(group, key, value)` triples in a stable order.
    pub fn entries(&self) -> impl Iterator<Item = (ParamGroupKind, &ParamKey, f64)> {
        ParamGroupKind::ALL
            .into_iter()
            .flat_map(move |kind| self.group(kind).iter().map(move |(k, v)| (kind, k, v)))
    }

    pub fn len(&self) -> usize {
        ParamGroupKind::ALL.iter().map(|k| self.group(*k).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Changes needed to turn `self` into `next`. Keys removed in `next` are
    /// not reported: parameter sets only ever gain keys.
    pub fn diff(&self, next: &BehaviorParams) -> Vec<ParamChange> {
        next.entries()
            .filter_map(|(group, key, new)| {
                let old = self.get(group, key.as_str());
                match old {
                    Some(o) if o.to_bits() == new.to_bits() => None,
                    _ => Some(ParamChange {
                        group,
                        key: key.clone(),
                        old,
                        new,
                    }),
                }
            })
            .collect()
    }
}
