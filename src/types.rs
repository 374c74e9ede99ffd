//! Core data types used throughout the aggregator
//!
//! # Key Types
//!
//! - **`LabelKey`**: Identity of one series; an unordered label name → value mapping
//! - **`Sample`**: One flat record produced by a collector for the push sink
//! - **`MetricType`**: Statistics a delay series can track
//! - **`DurationUnit`**: Unit of an observed duration before conversion to milliseconds
//! - **`CountOp`**: Mutation applied to a count series
//!
//! # Example
//!
//! ```rust
//! use kuba_aggregator::types::LabelKey;
//!
//! let a = LabelKey::from_pairs([("host", "server1"), ("dc", "us-east")]).unwrap();
//! let b = LabelKey::from_pairs([("dc", "us-east"), ("host", "server1")]).unwrap();
//!
//! // Same pairs in a different order identify the same series
//! assert_eq!(a, b);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::LabelError;

/// Label appended to every summary sample carrying the target quantile
pub const QUANTILE_LABEL: &str = "quantile";

/// Index name used by count recorders that never set one
pub const DEFAULT_COUNT_INDEX: &str = "count";

/// Identity of one time series
///
/// Keeps the label names and values in the order the caller supplied them
/// (that order is what the push sink sees), while equality and hashing are
/// computed over the name-sorted pairs. Two keys built from the same pairs
/// in a different order are equal; a key with an extra or missing pair is not.
///
/// Cloning is cheap: the label lists are shared behind an `Arc`.
#[derive(Clone)]
pub struct LabelKey {
    inner: Arc<LabelKeyInner>,
}

struct LabelKeyInner {
    names: Vec<String>,
    values: Vec<String>,
    /// Indices into `names`/`values`, sorted by label name
    sorted: Vec<usize>,
}

impl LabelKey {
    /// Build a key from parallel name and value lists
    ///
    /// Fails when the lists differ in length, when a name or value is empty,
    /// or when a name repeats.
    pub fn new(names: Vec<String>, values: Vec<String>) -> Result<Self, LabelError> {
        if names.len() != values.len() {
            return Err(LabelError::CountMismatch {
                names: names.len(),
                values: values.len(),
            });
        }

        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(LabelError::EmptyName(i));
            }
            if values[i].is_empty() {
                return Err(LabelError::EmptyValue(name.clone()));
            }
        }

        let mut sorted: Vec<usize> = (0..names.len()).collect();
        sorted.sort_by(|&a, &b| names[a].cmp(&names[b]));

        if let Some(pair) = sorted.windows(2).find(|w| names[w[0]] == names[w[1]]) {
            return Err(LabelError::DuplicateName(names[pair[0]].clone()));
        }

        Ok(Self {
            inner: Arc::new(LabelKeyInner {
                names,
                values,
                sorted,
            }),
        })
    }

    /// Build a key from `(name, value)` pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, LabelError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let (names, values) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self::new(names, values)
    }

    /// The key of the unlabeled series
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(LabelKeyInner {
                names: Vec::new(),
                values: Vec::new(),
                sorted: Vec::new(),
            }),
        }
    }

    /// Resolve the optional lists a deferred builder collected
    ///
    /// Neither list set means the unlabeled series; values without names is
    /// an error.
    pub(crate) fn resolve(
        names: Option<Vec<String>>,
        values: Option<Vec<String>>,
    ) -> Result<Self, LabelError> {
        match (names, values) {
            (None, None) => Ok(Self::empty()),
            (None, Some(_)) => Err(LabelError::MissingNames),
            (Some(names), values) => Self::new(names, values.unwrap_or_default()),
        }
    }

    /// Label names in caller order
    pub fn names(&self) -> &[String] {
        &self.inner.names
    }

    /// Label values in caller order
    pub fn values(&self) -> &[String] {
        &self.inner.values
    }

    /// Number of label pairs
    pub fn len(&self) -> usize {
        self.inner.names.len()
    }

    /// Whether this is the unlabeled series
    pub fn is_empty(&self) -> bool {
        self.inner.names.is_empty()
    }

    /// Value for a label name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .names
            .iter()
            .position(|n| n == name)
            .map(|i| self.inner.values[i].as_str())
    }

    /// Pairs sorted by label name
    pub fn sorted_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .sorted
            .iter()
            .map(move |&i| (self.inner.names[i].as_str(), self.inner.values[i].as_str()))
    }
}

impl PartialEq for LabelKey {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        self.len() == other.len() && self.sorted_pairs().eq(other.sorted_pairs())
    }
}

impl Eq for LabelKey {}

impl Hash for LabelKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Sorted order so insertion order never changes the hash
        self.len().hash(state);
        for (name, value) in self.sorted_pairs() {
            name.hash(state);
            value.hash(state);
        }
    }
}

impl fmt::Debug for LabelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LabelKey{}", self)
    }
}

impl fmt::Display for LabelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.names().iter().zip(self.values()).enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, "}}")
    }
}

impl Default for LabelKey {
    fn default() -> Self {
        Self::empty()
    }
}

/// One flat record handed to the push sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Metric family name
    pub metric_name: String,
    /// Label names, parallel to `label_values`
    pub label_names: Vec<String>,
    /// Label values
    pub label_values: Vec<String>,
    /// Current value
    pub value: f64,
}

impl Sample {
    /// Value of a label on this sample
    pub fn label(&self, name: &str) -> Option<&str> {
        self.label_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.label_values[i].as_str())
    }
}

/// Statistics a delay series can track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Largest observation of the cycle
    Max,
    /// Smallest observation of the cycle
    Min,
    /// Mean over the bounded recent-value ring
    Avg,
    /// Population variance over the bounded recent-value ring
    Variance,
    /// Cumulative count, sum and windowed quantiles
    Summary,
}

impl MetricType {
    /// Every statistic, in push order
    pub const ALL: [MetricType; 5] = [
        MetricType::Max,
        MetricType::Min,
        MetricType::Avg,
        MetricType::Variance,
        MetricType::Summary,
    ];

    /// Metric family name
    pub fn name(&self) -> &'static str {
        match self {
            MetricType::Max => "delay_max",
            MetricType::Min => "delay_min",
            MetricType::Avg => "delay_avg",
            MetricType::Variance => "delay_variance",
            MetricType::Summary => "delay_summary",
        }
    }

    /// Help text
    pub fn description(&self) -> &'static str {
        match self {
            MetricType::Max => "Maximum delay in milliseconds",
            MetricType::Min => "Minimum delay in milliseconds",
            MetricType::Avg => "Average delay in milliseconds",
            MetricType::Variance => "Delay variance in milliseconds squared",
            MetricType::Summary => "Delay distribution in milliseconds",
        }
    }
}

/// Unit of a duration passed to a delay recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    /// Nanoseconds
    Nanos,
    /// Microseconds
    Micros,
    /// Milliseconds
    #[default]
    Millis,
    /// Seconds
    Seconds,
}

impl DurationUnit {
    /// Convert a duration in this unit to milliseconds
    #[inline]
    pub fn to_millis(self, value: f64) -> f64 {
        match self {
            DurationUnit::Nanos => value / 1_000_000.0,
            DurationUnit::Micros => value / 1_000.0,
            DurationUnit::Millis => value,
            DurationUnit::Seconds => value * 1_000.0,
        }
    }
}

/// Mutation applied to a count series
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CountOp {
    /// Add to the accumulator
    Increase(f64),
    /// Subtract from the accumulator
    Reduce(f64),
    /// Overwrite the accumulator
    Reset(f64),
}

/// Strip every character outside `[A-Za-z0-9_]`
pub fn sanitize_index_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Format a quantile target the way Prometheus expects it in the `quantile` label
pub fn format_quantile(q: f64) -> String {
    if q.is_nan() {
        "NaN".to_string()
    } else if q == f64::INFINITY {
        "+Inf".to_string()
    } else if q == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{}", q)
    }
}
