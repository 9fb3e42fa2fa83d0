//! The in-memory representation of collected metrics.
//!
//! A [`MetricFamily`] is built fresh on every gather by a [`Collector`][crate::Collector] and
//! handed to the text generators. Nothing here is persisted across gathers.
use std::fmt;

use indexmap::IndexMap;

use crate::common::SampleError;

/// An ordered set of label names to label values.
pub type Labels = IndexMap<String, String>;

/// The type of a metric family, as declared on its `# TYPE` line.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MetricType {
    /// A monotonically increasing counter.
    Counter,
    /// A value that can go up and down.
    Gauge,
    /// Quantiles, a count and a sum of observations.
    Summary,
    /// Cumulative buckets, a count and a sum of observations.
    Histogram,
    /// A histogram whose buckets can go down as well as up.
    GaugeHistogram,
    /// Static key/value metadata exposed as labels.
    Info,
    /// A set of boolean states, also known as an enum.
    StateSet,
    /// A metric of unknown type.
    Unknown,
}

impl MetricType {
    /// Gets the OpenMetrics name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Summary => "summary",
            MetricType::Histogram => "histogram",
            MetricType::GaugeHistogram => "gaugehistogram",
            MetricType::Info => "info",
            MetricType::StateSet => "stateset",
            MetricType::Unknown => "unknown",
        }
    }

    /// Gets the suffixes that samples of this type append to the family name.
    pub(crate) fn sample_suffixes(&self) -> &'static [&'static str] {
        match self {
            MetricType::Counter => &["_total", "_created"],
            MetricType::Summary => &["_sum", "_count", "_created"],
            MetricType::Histogram => &["_bucket", "_sum", "_count", "_created"],
            MetricType::GaugeHistogram => &["_bucket", "_gsum", "_gcount"],
            MetricType::Info => &["_info"],
            MetricType::Gauge | MetricType::StateSet | MetricType::Unknown => &[],
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dynamically typed sample value.
///
/// Collectors may hand over whatever they have on hand; the value is coerced to a float when it
/// is rendered. Coercion fails for values that are not numeric.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A floating-point number.
    Float(f64),
    /// An integer.
    Int(i64),
    /// A textual number, parsed at render time.
    Text(String),
    /// No value at all.
    Absent,
    /// A sequence of values.
    List(Vec<Value>),
    /// A mapping of keys to values.
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Coerces this value to a float.
    ///
    /// ## Errors
    ///
    /// Returns [`SampleError::Type`] for absent, list and map values, and [`SampleError::Value`]
    /// for text that does not parse as a number.
    pub fn to_f64(&self) -> Result<f64, SampleError> {
        match self {
            Value::Float(value) => Ok(*value),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(value) => Ok(*value as f64),
            Value::Text(text) => {
                text.trim().parse::<f64>().map_err(|_| SampleError::Value(text.clone()))
            }
            Value::Absent => Err(SampleError::Type("nothing")),
            Value::List(_) => Err(SampleError::Type("a list")),
            Value::Map(_) => Err(SampleError::Type("a map")),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(f64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u64> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(value) => Value::Int(value),
            Err(_) => Value::Float(value as f64),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Absent, Into::into)
    }
}

/// The time at which a sample was observed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Timestamp {
    /// Seconds since the Unix epoch.
    Seconds(f64),
    /// Whole seconds and nanoseconds since the Unix epoch.
    ///
    /// The instant is `seconds + nanos / 1e9`; nanoseconds are always added, so one and a half
    /// seconds before the epoch is `{ seconds: -2, nanos: 500_000_000 }`.
    Precise {
        /// Whole seconds.
        seconds: i64,
        /// Nanoseconds, below one second.
        nanos: u32,
    },
}

impl Timestamp {
    /// Creates a precise timestamp, carrying any excess nanoseconds into the seconds.
    ///
    /// Seconds saturate at the bounds of `i64`.
    pub fn new(seconds: i64, nanos: u32) -> Self {
        Timestamp::Precise {
            seconds: seconds.saturating_add(i64::from(nanos / 1_000_000_000)),
            nanos: nanos % 1_000_000_000,
        }
    }

    /// Gets the timestamp in whole milliseconds, truncated toward zero and saturating at the
    /// bounds of `i64`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_millis(&self) -> i64 {
        match self {
            // Float to integer casts saturate.
            Timestamp::Seconds(seconds) => (seconds * 1000.0) as i64,
            Timestamp::Precise { .. } => {
                let millis = self.total_nanos() / 1_000_000;
                i64::try_from(millis).unwrap_or(if millis < 0 { i64::MIN } else { i64::MAX })
            }
        }
    }

    pub(crate) fn total_nanos(&self) -> i128 {
        match self {
            #[allow(clippy::cast_possible_truncation)]
            Timestamp::Seconds(seconds) => (seconds * 1e9) as i128,
            Timestamp::Precise { seconds, nanos } => {
                i128::from(*seconds) * 1_000_000_000 + i128::from(*nanos)
            }
        }
    }
}

impl From<f64> for Timestamp {
    fn from(seconds: f64) -> Self {
        Timestamp::Seconds(seconds)
    }
}

impl From<std::time::SystemTime> for Timestamp {
    fn from(time: std::time::SystemTime) -> Self {
        match time.duration_since(std::time::UNIX_EPOCH) {
            Ok(after) => {
                let seconds = i64::try_from(after.as_secs()).unwrap_or(i64::MAX);
                Timestamp::new(seconds, after.subsec_nanos())
            }
            Err(e) => {
                let before = e.duration();
                let seconds = i64::try_from(before.as_secs()).unwrap_or(i64::MAX);
                match before.subsec_nanos() {
                    0 => Timestamp::new(-seconds, 0),
                    nanos => Timestamp::new(-seconds - 1, 1_000_000_000 - nanos),
                }
            }
        }
    }
}

/// An exemplar attached to a sample, linking it to e.g. a trace.
#[derive(Clone, Debug, PartialEq)]
pub struct Exemplar {
    /// Labels identifying the exemplar.
    pub labels: Labels,
    /// The observed value.
    pub value: Value,
    /// When the exemplar was observed.
    pub timestamp: Option<Timestamp>,
}

impl Exemplar {
    /// Creates a new exemplar.
    pub fn new<I, K, V>(labels: I, value: impl Into<Value>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Exemplar {
            labels: labels.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            value: value.into(),
            timestamp: None,
        }
    }

    /// Sets the time at which the exemplar was observed.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<Timestamp>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

/// A single data point of a metric family.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// The full sample name, including any suffix such as `_total` or `_bucket`.
    pub name: String,
    /// The sample labels, in emission order.
    pub labels: Labels,
    /// The sample value.
    pub value: Value,
    /// When the value was observed, if known.
    pub timestamp: Option<Timestamp>,
    /// An exemplar, rendered by OpenMetrics only.
    pub exemplar: Option<Exemplar>,
}

impl Sample {
    /// Creates an unlabeled sample.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Sample {
            name: name.into(),
            labels: Labels::new(),
            value: value.into(),
            timestamp: None,
            exemplar: None,
        }
    }

    /// Adds a label, replacing any existing label of the same name.
    #[must_use]
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    /// Replaces all labels.
    #[must_use]
    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    /// Sets the observation time.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<Timestamp>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Attaches an exemplar.
    #[must_use]
    pub fn with_exemplar(mut self, exemplar: Exemplar) -> Self {
        self.exemplar = Some(exemplar);
        self
    }
}

/// A histogram bucket: the upper bound and the cumulative count of observations below it.
#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    /// The upper bound, as rendered in the `le` label, e.g. `0.5` or `+Inf`.
    pub bound: String,
    /// The cumulative count.
    pub count: Value,
    /// An exemplar for this bucket.
    pub exemplar: Option<Exemplar>,
}

impl Bucket {
    /// Creates a bucket.
    pub fn new(bound: impl Into<String>, count: impl Into<Value>) -> Self {
        Bucket { bound: bound.into(), count: count.into(), exemplar: None }
    }

    /// Attaches an exemplar to the bucket.
    #[must_use]
    pub fn with_exemplar(mut self, exemplar: Exemplar) -> Self {
        self.exemplar = Some(exemplar);
        self
    }
}

/// One named metric and all of its current samples.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricFamily {
    /// The raw, unescaped family name.
    pub name: String,
    /// The help text.
    pub documentation: String,
    /// The declared type.
    pub kind: MetricType,
    /// The unit, already reflected in `name`.
    pub unit: Option<String>,
    /// The samples, in emission order.
    pub samples: Vec<Sample>,
    label_names: Vec<String>,
}

impl MetricFamily {
    /// Creates an empty metric family.
    ///
    /// When a unit is given, `_<unit>` is appended to the name unless the name already ends with
    /// it.
    pub fn new(
        name: impl Into<String>,
        documentation: impl Into<String>,
        kind: MetricType,
        unit: Option<&str>,
    ) -> Self {
        let mut family = MetricFamily {
            name: name.into(),
            documentation: documentation.into(),
            kind,
            unit: None,
            samples: Vec::new(),
            label_names: Vec::new(),
        };
        if let Some(unit) = unit {
            family.apply_unit(unit);
        }
        family
    }

    /// Creates a counter family. A trailing `_total` is stripped from the name.
    pub fn counter(name: &str, documentation: impl Into<String>) -> Self {
        let name = name.strip_suffix("_total").unwrap_or(name);
        Self::new(name, documentation, MetricType::Counter, None)
    }

    /// Creates a gauge family.
    pub fn gauge(name: impl Into<String>, documentation: impl Into<String>) -> Self {
        Self::new(name, documentation, MetricType::Gauge, None)
    }

    /// Creates a summary family.
    pub fn summary(name: impl Into<String>, documentation: impl Into<String>) -> Self {
        Self::new(name, documentation, MetricType::Summary, None)
    }

    /// Creates a histogram family.
    pub fn histogram(name: impl Into<String>, documentation: impl Into<String>) -> Self {
        Self::new(name, documentation, MetricType::Histogram, None)
    }

    /// Creates a gauge histogram family.
    pub fn gauge_histogram(name: impl Into<String>, documentation: impl Into<String>) -> Self {
        Self::new(name, documentation, MetricType::GaugeHistogram, None)
    }

    /// Creates an info family.
    pub fn info(name: impl Into<String>, documentation: impl Into<String>) -> Self {
        Self::new(name, documentation, MetricType::Info, None)
    }

    /// Creates a state set (enum) family.
    pub fn state_set(name: impl Into<String>, documentation: impl Into<String>) -> Self {
        Self::new(name, documentation, MetricType::StateSet, None)
    }

    /// Creates a family of unknown type.
    pub fn unknown(name: impl Into<String>, documentation: impl Into<String>) -> Self {
        Self::new(name, documentation, MetricType::Unknown, None)
    }

    /// Declares the unit of this family, appending it to the name if missing.
    #[must_use]
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.apply_unit(unit);
        self
    }

    /// Declares the label names that the positional label values of the `add_*` methods map to.
    #[must_use]
    pub fn with_label_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_names = names.into_iter().map(Into::into).collect();
        self
    }

    fn apply_unit(&mut self, unit: &str) {
        if unit.is_empty() {
            return;
        }
        let suffix = format!("_{unit}");
        if !self.name.ends_with(&suffix) {
            self.name.push_str(&suffix);
        }
        self.unit = Some(unit.to_string());
    }

    fn labels_for(&self, values: &[&str]) -> Labels {
        self.label_names
            .iter()
            .zip(values)
            .map(|(name, value)| (name.clone(), (*value).to_string()))
            .collect()
    }

    fn push(&mut self, suffix: &str, labels: Labels, value: Value) {
        let name = format!("{}{}", self.name, suffix);
        self.samples.push(Sample::new(name, value).with_labels(labels));
    }

    /// Appends an arbitrary sample.
    pub fn add_sample(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Adds a counter value, and its creation time when known.
    pub fn add_counter(&mut self, labels: &[&str], value: impl Into<Value>, created: Option<f64>) {
        let labels = self.labels_for(labels);
        if let Some(created) = created {
            self.push("_total", labels.clone(), value.into());
            self.push("_created", labels, Value::Float(created));
        } else {
            self.push("_total", labels, value.into());
        }
    }

    /// Adds a gauge value.
    pub fn add_gauge(&mut self, labels: &[&str], value: impl Into<Value>) {
        let labels = self.labels_for(labels);
        self.push("", labels, value.into());
    }

    /// Adds a value of unknown type.
    pub fn add_unknown(&mut self, labels: &[&str], value: impl Into<Value>) {
        self.add_gauge(labels, value);
    }

    /// Adds the count and sum of a summary, and its creation time when known.
    pub fn add_summary(
        &mut self,
        labels: &[&str],
        count: impl Into<Value>,
        sum: impl Into<Value>,
        created: Option<f64>,
    ) {
        let labels = self.labels_for(labels);
        self.push("_count", labels.clone(), count.into());
        self.push("_sum", labels.clone(), sum.into());
        if let Some(created) = created {
            self.push("_created", labels, Value::Float(created));
        }
    }

    /// Adds histogram buckets, followed by the count and sum.
    ///
    /// The last bucket should be `+Inf`; its count doubles as the histogram count. The count and
    /// sum are omitted when `sum` is `None` or when the first bucket has a negative bound, since
    /// a sum is meaningless with negative observations.
    pub fn add_histogram(
        &mut self,
        labels: &[&str],
        buckets: Vec<Bucket>,
        sum: Option<Value>,
        created: Option<f64>,
    ) {
        let labels = self.labels_for(labels);
        let non_negative = buckets
            .first()
            .map_or(true, |b| b.bound.trim().parse::<f64>().map_or(true, |bound| bound >= 0.0));
        let count = buckets.last().map(|b| b.count.clone());

        self.push_buckets(&labels, buckets);
        if let (Some(sum), Some(count), true) = (sum, count, non_negative) {
            self.push("_count", labels.clone(), count);
            self.push("_sum", labels.clone(), sum);
        }
        if let Some(created) = created {
            self.push("_created", labels, Value::Float(created));
        }
    }

    /// Adds gauge histogram buckets, followed by the gauge count and gauge sum.
    pub fn add_gauge_histogram(
        &mut self,
        labels: &[&str],
        buckets: Vec<Bucket>,
        gsum: impl Into<Value>,
    ) {
        let labels = self.labels_for(labels);
        let count = buckets.last().map_or(Value::Absent, |b| b.count.clone());

        self.push_buckets(&labels, buckets);
        self.push("_gcount", labels.clone(), count);
        self.push("_gsum", labels, gsum.into());
    }

    fn push_buckets(&mut self, labels: &Labels, buckets: Vec<Bucket>) {
        let name = format!("{}_bucket", self.name);
        for bucket in buckets {
            let mut labels = labels.clone();
            labels.insert("le".to_string(), bucket.bound);
            let mut sample = Sample::new(name.clone(), bucket.count).with_labels(labels);
            sample.exemplar = bucket.exemplar;
            self.samples.push(sample);
        }
    }

    /// Adds an info sample carrying the given key/value pairs as labels.
    pub fn add_info<I, K, V>(&mut self, labels: &[&str], info: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut labels = self.labels_for(labels);
        labels.extend(info.into_iter().map(|(k, v)| (k.into(), v.into())));
        self.push("_info", labels, Value::Int(1));
    }

    /// Adds one sample per state, with a value of 1 for enabled states and 0 otherwise.
    pub fn add_state_set(&mut self, labels: &[&str], states: &[(&str, bool)]) {
        let labels = self.labels_for(labels);
        for (state, enabled) in states {
            let mut labels = labels.clone();
            labels.insert(self.name.clone(), (*state).to_string());
            self.push("", labels, Value::Int(i64::from(*enabled)));
        }
    }

    /// Gets the names under which this family's samples are exposed.
    pub fn exposed_names(&self) -> Vec<String> {
        std::iter::once(self.name.clone())
            .chain(self.kind.sample_suffixes().iter().map(|suffix| format!("{}{suffix}", self.name)))
            .collect()
    }

    /// Creates a copy of this family keeping only the samples accepted by `filter`.
    pub(crate) fn filtered<F>(&self, mut filter: F) -> MetricFamily
    where
        F: FnMut(&Sample) -> bool,
    {
        MetricFamily {
            name: self.name.clone(),
            documentation: self.documentation.clone(),
            kind: self.kind,
            unit: self.unit.clone(),
            samples: self.samples.iter().filter(|s| filter(s)).cloned().collect(),
            label_names: self.label_names.clone(),
        }
    }
}
