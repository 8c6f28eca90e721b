use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unordered `key → value` labels with unique keys.
///
/// Backed by a `BTreeMap` so two sets with the same pairs compare, hash and
/// render identically regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; a repeated key overwrites the earlier value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// ─── Metric identity ─────────────────────────────────────────────

/// Registry key: metric name plus the labels that distinguish series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MetricKey {
    pub name: String,
    pub labels: LabelSet,
}

impl MetricKey {
    pub fn new(name: impl Into<String>, labels: LabelSet) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }

    pub fn unlabelled(name: impl Into<String>) -> Self {
        Self::new(name, LabelSet::new())
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&sanitize_name(&self.name))?;
        if self.labels.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}=\"{}\"", sanitize_name(k), escape_label_value(v))?;
        }
        f.write_str("}")
    }
}

/// Metric names and label keys are bare words in the text exposition:
/// anything outside `[A-Za-z0-9_.:-]` becomes `_`.
pub(crate) fn sanitize_name(name: &str) -> Cow<'_, str> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-');
    if !name.is_empty() && name.chars().all(allowed) {
        return Cow::Borrowed(name);
    }
    if name.is_empty() {
        return Cow::Borrowed("_");
    }
    Cow::Owned(
        name.chars()
            .map(|c| if allowed(c) { c } else { '_' })
            .collect(),
    )
}

/// Escapes `\`, `"` and newlines so a label value fits inside quotes.
pub(crate) fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// How closed spans are mapped onto aggregators.
///
/// Same-name spans from concurrent requests either share one aggregator
/// (`NameOnly`) or are split by their label sets (`NameAndLabels`). This is
/// an explicit configuration choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    #[default]
    NameAndLabels,
    NameOnly,
}

impl KeyPolicy {
    pub fn key_for(self, name: &str, labels: &LabelSet) -> MetricKey {
        MetricKey::new(name, self.key_labels(labels).into_owned())
    }

    /// The part of `labels` that identifies a series; borrows when it can.
    pub fn key_labels(self, labels: &LabelSet) -> Cow<'_, LabelSet> {
        match self {
            Self::NameAndLabels => Cow::Borrowed(labels),
            Self::NameOnly => Cow::Owned(LabelSet::new()),
        }
    }
}
