//! Metric Registry
//!
//! A name-keyed table of metric families backed by the `prometheus` crate.
//! Every family remembers its concrete kind, so operations are dispatched at
//! runtime and rejected when they do not fit the kind (a gauge is never
//! incremented as if it were a counter).
//!
//! Families registered without label names use the scalar prometheus types;
//! the rest use the `*Vec` types keyed by label values.

use std::collections::BTreeMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use prometheus::core::{MetricVec, MetricVecBuilder};
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use tracing::debug;

use crate::domain::models::{MetricDescriptor, MetricKind, MetricValue};
use crate::domain::ports::Labels;
use crate::error::{Error, Result};

// =============================================================================
// Storage
// =============================================================================

/// Scalar or label-vector storage for one family.
#[derive(Clone)]
enum Family<S, V> {
    Scalar(S),
    Labeled(V),
}

impl<B: MetricVecBuilder> Family<B::M, MetricVec<B>> {
    /// Resolve the child for an ordered list of label values.
    fn child(&self, values: &[&str]) -> Result<B::M> {
        match self {
            Family::Scalar(metric) => Ok(metric.clone()),
            Family::Labeled(vec) => Ok(vec.get_metric_with_label_values(values)?),
        }
    }
}

/// Kind-specific storage. Summaries are bucketed like histograms since the
/// prometheus crate has no quantile summary type.
#[derive(Clone)]
enum MetricStorage {
    Counter(Family<Counter, CounterVec>),
    Gauge(Family<Gauge, GaugeVec>),
    Histogram(Family<Histogram, HistogramVec>),
    Summary(Family<Histogram, HistogramVec>),
}

#[derive(Clone)]
struct MetricFamily {
    descriptor: MetricDescriptor,
    storage: MetricStorage,
}

impl MetricFamily {
    /// Map a label set onto the family's label names, in order.
    ///
    /// Missing labels read as the empty string, unknown labels are rejected.
    fn label_values<'a>(&'a self, labels: &'a Labels) -> Result<Vec<&'a str>> {
        if let Some(unknown) = labels
            .keys()
            .find(|k| !self.descriptor.label_names.contains(*k))
        {
            return Err(Error::InvalidLabels {
                name: self.descriptor.name.clone(),
                reason: format!("unknown label '{}'", unknown),
            });
        }

        Ok(self
            .descriptor
            .label_names
            .iter()
            .map(|name| labels.get(name).map(String::as_str).unwrap_or(""))
            .collect())
    }

    fn kind(&self) -> MetricKind {
        self.descriptor.kind
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Thread-safe table of dynamically registered metrics.
pub struct MetricRegistry {
    registry: Registry,
    families: DashMap<String, MetricFamily>,
}

impl std::fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("families", &self.families.len())
            .finish()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            families: DashMap::new(),
        }
    }

    /// Create a registry whose exposition prefixes every name with
    /// `prefix_` and attaches `const_labels` to every sample.
    pub fn with_prefix_and_labels(
        prefix: &str,
        const_labels: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let prefix = (!prefix.is_empty()).then(|| prefix.to_string());
        let labels = (!const_labels.is_empty()).then(|| {
            const_labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        });

        Ok(Self {
            registry: Registry::new_custom(prefix, labels)?,
            families: DashMap::new(),
        })
    }

    /// Underlying prometheus registry, for exposition.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register a metric family with default histogram buckets.
    pub fn register_metric(
        &self,
        name: &str,
        help: &str,
        kind: MetricKind,
        label_names: &[&str],
    ) -> Result<()> {
        self.register_with_buckets(name, help, kind, label_names, None)
    }

    /// Register a histogram with explicit bucket bounds.
    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
        buckets: Vec<f64>,
    ) -> Result<()> {
        self.register_with_buckets(name, help, MetricKind::Histogram, label_names, Some(buckets))
    }

    fn register_with_buckets(
        &self,
        name: &str,
        help: &str,
        kind: MetricKind,
        label_names: &[&str],
        buckets: Option<Vec<f64>>,
    ) -> Result<()> {
        let slot = match self.families.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(Error::AlreadyRegistered(name.to_string())),
            Entry::Vacant(slot) => slot,
        };

        let help = if help.is_empty() { name } else { help };
        let storage = build_storage(&self.registry, name, help, kind, label_names, buckets)?;

        slot.insert(MetricFamily {
            descriptor: MetricDescriptor {
                name: name.to_string(),
                help: help.to_string(),
                kind,
                label_names: label_names.iter().map(|l| l.to_string()).collect(),
            },
            storage,
        });

        debug!(metric = %name, kind = %kind, "Registered metric");
        Ok(())
    }

    fn family(&self, name: &str) -> Result<MetricFamily> {
        self.families
            .get(name)
            .map(|f| f.clone())
            .ok_or_else(|| Error::MetricNotFound(name.to_string()))
    }

    /// Set a gauge to `value`, or add `value` to a counter.
    pub fn set_metric(&self, name: &str, value: f64, labels: &Labels) -> Result<()> {
        let family = self.family(name)?;
        if !value.is_finite() {
            return Err(Error::InvalidValue {
                name: name.to_string(),
                reason: format!("{} is not finite", value),
            });
        }
        let values = family.label_values(labels)?;

        match &family.storage {
            MetricStorage::Gauge(gauge) => gauge.child(&values)?.set(value),
            MetricStorage::Counter(counter) => {
                if value < 0.0 {
                    return Err(Error::InvalidValue {
                        name: name.to_string(),
                        reason: format!("counters cannot decrease (got {})", value),
                    });
                }
                counter.child(&values)?.inc_by(value)
            }
            MetricStorage::Histogram(_) | MetricStorage::Summary(_) => {
                return Err(Error::UnsupportedOperation {
                    name: name.to_string(),
                    kind: family.kind(),
                    operation: "set",
                })
            }
        }
        Ok(())
    }

    pub fn increment_counter(&self, name: &str, labels: &Labels) -> Result<()> {
        let family = self.family(name)?;
        match &family.storage {
            MetricStorage::Counter(counter) => {
                let values = family.label_values(labels)?;
                counter.child(&values)?.inc();
                Ok(())
            }
            _ => Err(Error::WrongKind {
                name: name.to_string(),
                expected: MetricKind::Counter,
                actual: family.kind(),
            }),
        }
    }

    /// Record an observation on a histogram or summary.
    pub fn observe_metric(&self, name: &str, value: f64, labels: &Labels) -> Result<()> {
        let family = self.family(name)?;
        match &family.storage {
            MetricStorage::Histogram(h) | MetricStorage::Summary(h) => {
                let values = family.label_values(labels)?;
                h.child(&values)?.observe(value);
                Ok(())
            }
            _ => Err(Error::UnsupportedOperation {
                name: name.to_string(),
                kind: family.kind(),
                operation: "observe",
            }),
        }
    }

    /// Set ad hoc gauges from loosely typed values.
    ///
    /// Every value is normalised and checked against any existing family
    /// before anything is touched, so one bad entry leaves the registry
    /// unchanged. Unknown names are sanitised and registered as label-less
    /// gauges; existing names must be label-less gauges or counters.
    pub fn push_metrics(&self, values: &BTreeMap<String, MetricValue>) -> Result<()> {
        let normalised = values
            .iter()
            .map(|(name, value)| {
                value
                    .as_f64()
                    .filter(|v| v.is_finite())
                    .map(|v| (sanitize_metric_name(name), v))
                    .ok_or_else(|| Error::Type {
                        name: name.clone(),
                        value: value.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        for (name, value) in &normalised {
            if let Some(family) = self.families.get(name) {
                check_pushable(&family, *value)?;
            }
        }

        let no_labels = Labels::new();
        for (name, value) in normalised {
            if !self.contains(&name) {
                match self.register_metric(&name, &name, MetricKind::Gauge, &[]) {
                    Ok(()) | Err(Error::AlreadyRegistered(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            self.set_metric(&name, value, &no_labels)?;
        }
        Ok(())
    }

    /// Current value of a counter or gauge child.
    pub fn get_value(&self, name: &str, labels: &Labels) -> Result<f64> {
        let family = self.family(name)?;
        let values = family.label_values(labels)?;
        match &family.storage {
            MetricStorage::Counter(c) => Ok(c.child(&values)?.get()),
            MetricStorage::Gauge(g) => Ok(g.child(&values)?.get()),
            MetricStorage::Histogram(_) | MetricStorage::Summary(_) => {
                Err(Error::UnsupportedOperation {
                    name: name.to_string(),
                    kind: family.kind(),
                    operation: "get_value",
                })
            }
        }
    }

    /// Number of observations recorded by a histogram or summary child.
    pub fn sample_count(&self, name: &str, labels: &Labels) -> Result<u64> {
        let family = self.family(name)?;
        let values = family.label_values(labels)?;
        match &family.storage {
            MetricStorage::Histogram(h) | MetricStorage::Summary(h) => {
                Ok(h.child(&values)?.get_sample_count())
            }
            _ => Err(Error::UnsupportedOperation {
                name: name.to_string(),
                kind: family.kind(),
                operation: "sample_count",
            }),
        }
    }

    pub fn descriptor(&self, name: &str) -> Option<MetricDescriptor> {
        self.families.get(name).map(|f| f.descriptor.clone())
    }

    /// All descriptors, sorted by name.
    pub fn descriptors(&self) -> Vec<MetricDescriptor> {
        let mut all: Vec<_> = self
            .families
            .iter()
            .map(|f| f.descriptor.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn contains(&self, name: &str) -> bool {
        self.families.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Prometheus text exposition of every registered family.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

/// Whether a pushed value can land on an existing family.
fn check_pushable(family: &MetricFamily, value: f64) -> Result<()> {
    let name = &family.descriptor.name;
    match family.kind() {
        MetricKind::Gauge => {}
        MetricKind::Counter if value < 0.0 => {
            return Err(Error::InvalidValue {
                name: name.clone(),
                reason: format!("counters cannot decrease (got {})", value),
            })
        }
        MetricKind::Counter => {}
        actual => {
            return Err(Error::WrongKind {
                name: name.clone(),
                expected: MetricKind::Gauge,
                actual,
            })
        }
    }
    if !family.descriptor.label_names.is_empty() {
        return Err(Error::InvalidLabels {
            name: name.clone(),
            reason: "pushed values carry no labels".to_string(),
        });
    }
    Ok(())
}

fn build_storage(
    registry: &Registry,
    name: &str,
    help: &str,
    kind: MetricKind,
    label_names: &[&str],
    buckets: Option<Vec<f64>>,
) -> Result<MetricStorage> {
    let labeled = !label_names.is_empty();

    let storage = match kind {
        MetricKind::Counter => {
            let opts = Opts::new(name, help);
            if labeled {
                let vec = CounterVec::new(opts, label_names)?;
                registry.register(Box::new(vec.clone()))?;
                MetricStorage::Counter(Family::Labeled(vec))
            } else {
                let counter = Counter::with_opts(opts)?;
                registry.register(Box::new(counter.clone()))?;
                MetricStorage::Counter(Family::Scalar(counter))
            }
        }
        MetricKind::Gauge => {
            let opts = Opts::new(name, help);
            if labeled {
                let vec = GaugeVec::new(opts, label_names)?;
                registry.register(Box::new(vec.clone()))?;
                MetricStorage::Gauge(Family::Labeled(vec))
            } else {
                let gauge = Gauge::with_opts(opts)?;
                registry.register(Box::new(gauge.clone()))?;
                MetricStorage::Gauge(Family::Scalar(gauge))
            }
        }
        MetricKind::Histogram | MetricKind::Summary => {
            let mut opts = HistogramOpts::new(name, help);
            if let Some(buckets) = buckets {
                opts = opts.buckets(buckets);
            }
            let family = if labeled {
                let vec = HistogramVec::new(opts, label_names)?;
                registry.register(Box::new(vec.clone()))?;
                Family::Labeled(vec)
            } else {
                let histogram = Histogram::with_opts(opts)?;
                registry.register(Box::new(histogram.clone()))?;
                Family::Scalar(histogram)
            };
            if kind == MetricKind::Summary {
                MetricStorage::Summary(family)
            } else {
                MetricStorage::Histogram(family)
            }
        }
    };

    Ok(storage)
}

/// Turn an arbitrary key into a valid Prometheus metric name.
///
/// Characters outside `[a-zA-Z0-9_:]` become `_`; a leading digit gets a
/// `_` prefix.
pub fn sanitize_metric_name(raw: &str) -> String {
    let mut name: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name.is_empty() {
        return "_".to_string();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // =========================================================================
    // Registration Tests
    // =========================================================================

    #[test]
    fn test_register_and_describe() {
        let registry = MetricRegistry::new();
        registry
            .register_metric("requests_total", "Requests", MetricKind::Counter, &["client"])
            .unwrap();

        let descriptor = registry.descriptor("requests_total").unwrap();
        assert_eq!(descriptor.kind, MetricKind::Counter);
        assert_eq!(descriptor.label_names, vec!["client"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = MetricRegistry::new();
        registry
            .register_metric("up", "Up", MetricKind::Gauge, &[])
            .unwrap();

        let err = registry
            .register_metric("up", "Up again", MetricKind::Counter, &[])
            .unwrap_err();
        assert_matches!(err, Error::AlreadyRegistered(name) if name == "up");
        assert_eq!(registry.descriptor("up").unwrap().kind, MetricKind::Gauge);
    }

    #[test]
    fn test_invalid_name_is_rejected_and_not_stored() {
        let registry = MetricRegistry::new();
        let err = registry
            .register_metric("bad-name", "", MetricKind::Gauge, &[])
            .unwrap_err();
        assert_matches!(err, Error::Prometheus(_));
        assert!(!registry.contains("bad-name"));
    }

    // =========================================================================
    // Kind Dispatch Tests
    // =========================================================================

    #[test]
    fn test_set_on_counter_adds() {
        let registry = MetricRegistry::new();
        registry
            .register_metric("bytes_total", "Bytes", MetricKind::Counter, &[])
            .unwrap();

        registry.set_metric("bytes_total", 5.0, &Labels::new()).unwrap();
        registry.set_metric("bytes_total", 3.0, &Labels::new()).unwrap();

        assert_eq!(registry.get_value("bytes_total", &Labels::new()).unwrap(), 8.0);
    }

    #[test]
    fn test_set_on_gauge_replaces() {
        let registry = MetricRegistry::new();
        registry
            .register_metric("queue_depth", "Depth", MetricKind::Gauge, &[])
            .unwrap();

        registry.set_metric("queue_depth", 5.0, &Labels::new()).unwrap();
        registry.set_metric("queue_depth", 3.0, &Labels::new()).unwrap();

        assert_eq!(registry.get_value("queue_depth", &Labels::new()).unwrap(), 3.0);
    }

    #[test]
    fn test_negative_counter_delta_rejected() {
        let registry = MetricRegistry::new();
        registry
            .register_metric("c", "", MetricKind::Counter, &[])
            .unwrap();
        assert_matches!(
            registry.set_metric("c", -1.0, &Labels::new()),
            Err(Error::InvalidValue { .. })
        );
        assert_matches!(
            registry.set_metric("c", f64::NAN, &Labels::new()),
            Err(Error::InvalidValue { .. })
        );
    }

    #[test]
    fn test_set_on_histogram_unsupported() {
        let registry = MetricRegistry::new();
        registry
            .register_metric("latency_seconds", "", MetricKind::Histogram, &[])
            .unwrap();

        assert_matches!(
            registry.set_metric("latency_seconds", 1.0, &Labels::new()),
            Err(Error::UnsupportedOperation { kind: MetricKind::Histogram, operation: "set", .. })
        );
    }

    #[test]
    fn test_increment_gauge_is_wrong_kind() {
        let registry = MetricRegistry::new();
        registry
            .register_metric("temperature", "", MetricKind::Gauge, &[])
            .unwrap();

        assert_matches!(
            registry.increment_counter("temperature", &Labels::new()),
            Err(Error::WrongKind {
                expected: MetricKind::Counter,
                actual: MetricKind::Gauge,
                ..
            })
        );
        assert_eq!(registry.get_value("temperature", &Labels::new()).unwrap(), 0.0);
    }

    #[test]
    fn test_unknown_metric_not_found() {
        let registry = MetricRegistry::new();
        assert_matches!(
            registry.set_metric("missing", 1.0, &Labels::new()),
            Err(Error::MetricNotFound(_))
        );
        assert_matches!(
            registry.increment_counter("missing", &Labels::new()),
            Err(Error::MetricNotFound(_))
        );
    }

    #[test]
    fn test_observe_histogram_and_summary() {
        let registry = MetricRegistry::new();
        registry
            .register_histogram("latency", "", &["route"], vec![0.1, 1.0])
            .unwrap();
        registry
            .register_metric("payload", "", MetricKind::Summary, &[])
            .unwrap();

        let route = labels(&[("route", "/a")]);
        registry.observe_metric("latency", 0.05, &route).unwrap();
        registry.observe_metric("latency", 0.5, &route).unwrap();
        registry.observe_metric("payload", 42.0, &Labels::new()).unwrap();

        assert_eq!(registry.sample_count("latency", &route).unwrap(), 2);
        assert_eq!(registry.sample_count("payload", &Labels::new()).unwrap(), 1);
        assert_matches!(
            registry.observe_metric("latency", 1.0, &labels(&[("route", "/a"), ("x", "y")])),
            Err(Error::InvalidLabels { .. })
        );
    }

    #[test]
    fn test_observe_counter_unsupported() {
        let registry = MetricRegistry::new();
        registry
            .register_metric("c", "", MetricKind::Counter, &[])
            .unwrap();
        assert_matches!(
            registry.observe_metric("c", 1.0, &Labels::new()),
            Err(Error::UnsupportedOperation { operation: "observe", .. })
        );
    }

    // =========================================================================
    // Label Tests
    // =========================================================================

    #[test]
    fn test_label_combinations_are_independent() {
        let registry = MetricRegistry::new();
        registry
            .register_metric("pairs", "", MetricKind::Gauge, &["a", "b"])
            .unwrap();

        registry
            .set_metric("pairs", 7.5, &labels(&[("a", "1"), ("b", "2")]))
            .unwrap();

        assert_eq!(
            registry
                .get_value("pairs", &labels(&[("a", "1"), ("b", "2")]))
                .unwrap(),
            7.5
        );
        assert_eq!(
            registry
                .get_value("pairs", &labels(&[("a", "1"), ("b", "3")]))
                .unwrap(),
            0.0
        );
    }

    #[test]
    fn test_missing_labels_read_as_empty() {
        let registry = MetricRegistry::new();
        registry
            .register_metric("hits", "", MetricKind::Counter, &["a", "b"])
            .unwrap();

        registry.increment_counter("hits", &labels(&[("a", "x")])).unwrap();
        assert_eq!(
            registry
                .get_value("hits", &labels(&[("a", "x"), ("b", "")]))
                .unwrap(),
            1.0
        );
    }

    #[test]
    fn test_scalar_family_rejects_labels() {
        let registry = MetricRegistry::new();
        registry
            .register_metric("plain", "", MetricKind::Gauge, &[])
            .unwrap();
        assert_matches!(
            registry.set_metric("plain", 1.0, &labels(&[("a", "1")])),
            Err(Error::InvalidLabels { .. })
        );
    }

    // =========================================================================
    // Push Tests
    // =========================================================================

    #[test]
    fn test_push_metrics_auto_registers_gauges() {
        let registry = MetricRegistry::new();
        let mut values = BTreeMap::new();
        values.insert("cpu.load".to_string(), MetricValue::Float(0.75));
        values.insert("workers".to_string(), MetricValue::Int(4));
        values.insert("ratio".to_string(), MetricValue::from("0.5"));

        registry.push_metrics(&values).unwrap();

        assert_eq!(registry.get_value("cpu_load", &Labels::new()).unwrap(), 0.75);
        assert_eq!(registry.get_value("workers", &Labels::new()).unwrap(), 4.0);
        assert_eq!(registry.get_value("ratio", &Labels::new()).unwrap(), 0.5);
        assert_eq!(registry.descriptor("workers").unwrap().kind, MetricKind::Gauge);
    }

    #[test]
    fn test_push_metrics_type_error_leaves_registry_untouched() {
        let registry = MetricRegistry::new();
        let mut values = BTreeMap::new();
        values.insert("good".to_string(), MetricValue::Int(1));
        values.insert("bad".to_string(), MetricValue::from("high"));

        assert_matches!(
            registry.push_metrics(&values),
            Err(Error::Type { name, .. }) if name == "bad"
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_push_metrics_non_finite_leaves_registry_untouched() {
        let registry = MetricRegistry::new();
        let mut values = BTreeMap::new();
        values.insert("a_good".to_string(), MetricValue::Int(7));
        values.insert("b_bad".to_string(), MetricValue::from("NaN"));

        assert_matches!(
            registry.push_metrics(&values),
            Err(Error::Type { name, .. }) if name == "b_bad"
        );
        assert!(registry.is_empty());

        values.insert("b_bad".to_string(), MetricValue::from("inf"));
        assert_matches!(registry.push_metrics(&values), Err(Error::Type { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_push_metrics_incompatible_family_leaves_registry_untouched() {
        let registry = MetricRegistry::new();
        registry
            .register_metric("z_latency", "", MetricKind::Histogram, &[])
            .unwrap();
        registry
            .register_metric("z_requests", "", MetricKind::Gauge, &["client"])
            .unwrap();

        let mut values = BTreeMap::new();
        values.insert("a_fresh".to_string(), MetricValue::Int(1));
        values.insert("z_latency".to_string(), MetricValue::Float(0.2));
        assert_matches!(
            registry.push_metrics(&values),
            Err(Error::WrongKind { actual: MetricKind::Histogram, .. })
        );
        assert!(!registry.contains("a_fresh"));

        let mut values = BTreeMap::new();
        values.insert("a_fresh".to_string(), MetricValue::Int(1));
        values.insert("z_requests".to_string(), MetricValue::Int(3));
        assert_matches!(registry.push_metrics(&values), Err(Error::InvalidLabels { .. }));
        assert!(!registry.contains("a_fresh"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_push_metrics_reuses_existing_counter() {
        let registry = MetricRegistry::new();
        registry
            .register_metric("events", "", MetricKind::Counter, &[])
            .unwrap();

        let mut values = BTreeMap::new();
        values.insert("events".to_string(), MetricValue::Int(2));
        registry.push_metrics(&values).unwrap();
        registry.push_metrics(&values).unwrap();

        assert_eq!(registry.get_value("events", &Labels::new()).unwrap(), 4.0);
    }

    #[test]
    fn test_sanitize_metric_name() {
        assert_eq!(sanitize_metric_name("http.requests-total"), "http_requests_total");
        assert_eq!(sanitize_metric_name("5xx_rate"), "_5xx_rate");
        assert_eq!(sanitize_metric_name("ns:metric"), "ns:metric");
        assert_eq!(sanitize_metric_name(""), "_");
    }

    // =========================================================================
    // Exposition Tests
    // =========================================================================

    #[test]
    fn test_render_with_prefix_and_const_labels() {
        let mut external = BTreeMap::new();
        external.insert("cluster".to_string(), "eu-1".to_string());
        let registry = MetricRegistry::with_prefix_and_labels("analyzer", &external).unwrap();

        registry
            .register_metric("errors_total", "Errors seen", MetricKind::Counter, &[])
            .unwrap();
        registry.set_metric("errors_total", 2.0, &Labels::new()).unwrap();

        let text = registry.render().unwrap();
        assert!(text.contains("# HELP analyzer_errors_total Errors seen"));
        assert!(text.contains("analyzer_errors_total{cluster=\"eu-1\"} 2"));
    }

    #[test]
    fn test_concurrent_registration_single_winner() {
        use std::sync::Arc;

        let registry = Arc::new(MetricRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry
                        .register_metric("shared", "", MetricKind::Gauge, &[])
                        .is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }
}
