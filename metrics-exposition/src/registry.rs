//! Collector registration and gathering.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use quanta::Instant;
use tracing::{debug, trace};

use crate::common::{ExpositionError, RegistryError, RenderError};
use crate::model::{Labels, MetricFamily};

const TARGET_INFO: &str = "target_info";

static DEFAULT_REGISTRY: Lazy<Arc<Registry>> =
    Lazy::new(|| Arc::new(Registry::with_auto_describe()));

/// A lazily evaluated sequence of metric families.
pub type Families<'a> = Box<dyn Iterator<Item = MetricFamily> + 'a>;

/// A source of metric families.
///
/// Collectors are asked for their families on every gather. They must be safe to call from any
/// thread, and are never called while the registry holds its lock.
pub trait Collector: Send + Sync {
    /// Produces the current metric families.
    fn collect(&self) -> Families<'_>;

    /// Describes the families this collector produces, without necessarily computing samples.
    ///
    /// The names are used to detect collisions at registration time and to skip collectors
    /// during a restricted gather. Returning `None` means the collector cannot describe itself.
    fn describe(&self) -> Option<Vec<MetricFamily>> {
        None
    }
}

impl<F> Collector for F
where
    F: Fn() -> Vec<MetricFamily> + Send + Sync,
{
    fn collect(&self) -> Families<'_> {
        Box::new(self().into_iter())
    }
}

/// Identifies a registered collector.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CollectorId(u64);

struct Registration {
    collector: Arc<dyn Collector>,
    names: Vec<String>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    collectors: IndexMap<CollectorId, Registration>,
    names: HashMap<String, CollectorId>,
    target_info: Option<Labels>,
}

/// A set of collectors gathered together into a single exposition.
#[derive(Default)]
pub struct Registry {
    auto_describe: bool,
    inner: RwLock<Inner>,
}

impl Registry {
    /// Creates an empty registry.
    ///
    /// Collectors that cannot describe themselves are registered without any known names, so
    /// collisions involving them are only detected when gathering.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry that calls [`Collector::collect`] to learn the names of
    /// collectors that cannot describe themselves.
    pub fn with_auto_describe() -> Self {
        Registry { auto_describe: true, inner: RwLock::default() }
    }

    /// Registers a collector.
    ///
    /// ## Errors
    ///
    /// If any of the names the collector exposes is already exposed by a registered collector,
    /// an error is returned and the collector is not registered.
    pub fn register<C>(&self, collector: C) -> Result<CollectorId, RegistryError>
    where
        C: Collector + 'static,
    {
        self.register_arc(Arc::new(collector))
    }

    /// Registers a shared collector.
    ///
    /// ## Errors
    ///
    /// If any of the names the collector exposes is already exposed by a registered collector,
    /// an error is returned and the collector is not registered.
    pub fn register_arc(&self, collector: Arc<dyn Collector>) -> Result<CollectorId, RegistryError> {
        let families = match collector.describe() {
            Some(families) => families,
            None if self.auto_describe => collector.collect().collect(),
            None => Vec::new(),
        };

        let mut inner = self.inner.write();
        let mut names = Vec::new();
        for family in &families {
            let exposed = family.exposed_names();
            let duplicates = exposed
                .iter()
                .filter(|name| {
                    inner.names.contains_key(*name)
                        || names.contains(*name)
                        || (inner.target_info.is_some() && *name == TARGET_INFO)
                })
                .cloned()
                .collect::<Vec<_>>();
            if !duplicates.is_empty() {
                return Err(RegistryError::Duplicate { names: duplicates, family: Box::new(family.clone()) });
            }
            names.extend(exposed);
        }

        let id = CollectorId(inner.next_id);
        inner.next_id += 1;
        for name in &names {
            inner.names.insert(name.clone(), id);
        }
        debug!(collector = id.0, names = names.len(), "registered collector");
        inner.collectors.insert(id, Registration { collector, names });
        Ok(id)
    }

    /// Removes a collector, returning whether it was registered.
    pub fn unregister(&self, id: CollectorId) -> bool {
        let mut inner = self.inner.write();
        match inner.collectors.shift_remove(&id) {
            Some(registration) => {
                for name in &registration.names {
                    inner.names.remove(name);
                }
                true
            }
            None => false,
        }
    }

    /// Removes every collector and the target info.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.collectors.clear();
        inner.names.clear();
        inner.target_info = None;
    }

    /// Sets the labels of the `target_info` metric, or removes it.
    ///
    /// ## Errors
    ///
    /// If a registered collector already exposes `target_info`, an error is returned.
    pub fn set_target_info(&self, labels: Option<Labels>) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        if let Some(labels) = &labels {
            if inner.target_info.is_none() && inner.names.contains_key(TARGET_INFO) {
                return Err(RegistryError::Duplicate {
                    names: vec![TARGET_INFO.to_string()],
                    family: Box::new(target_info_family(labels)),
                });
            }
        }
        inner.target_info = labels;
        Ok(())
    }

    /// Gets the labels of the `target_info` metric, if set.
    pub fn target_info(&self) -> Option<Labels> {
        self.inner.read().target_info.clone()
    }

    /// Collects metric families from every registered collector, in registration order.
    ///
    /// ## Errors
    ///
    /// If two families expose the same name, an error is returned carrying the second one.
    pub fn gather(&self) -> Result<Vec<MetricFamily>, RegistryError> {
        let (collectors, target_info) = self.snapshot(None);
        collect_all(&collectors, target_info, Some)
    }

    /// Collects only the metric families, or samples, with the given names.
    ///
    /// A family whose own name is requested is returned whole. Otherwise only its samples whose
    /// names are requested are kept, and the family is dropped if none are.
    ///
    /// ## Errors
    ///
    /// If two of the returned families expose the same name, an error is returned.
    pub fn gather_restricted<I, S>(&self, names: I) -> Result<Vec<MetricFamily>, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names.into_iter().map(Into::into).collect::<HashSet<String>>();
        let (collectors, target_info) = self.snapshot(Some(&names));
        let target_info = target_info.filter(|_| names.contains(TARGET_INFO));
        collect_all(&collectors, target_info, |family| {
            if names.contains(&family.name) {
                return Some(family);
            }
            let restricted = family.filtered(|sample| names.contains(&sample.name));
            (!restricted.samples.is_empty()).then_some(restricted)
        })
    }

    /// Gets the value of a single sample, or `None` if no such sample exists.
    ///
    /// Intended for tests and debugging; it gathers everything on each call.
    ///
    /// ## Errors
    ///
    /// If gathering fails, or if the sample value is not numeric, an error is returned.
    pub fn get_sample_value(
        &self,
        name: &str,
        labels: &[(&str, &str)],
    ) -> Result<Option<f64>, ExpositionError> {
        let wanted: Labels = labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        for family in self.gather()? {
            for sample in &family.samples {
                if sample.name == name && sample.labels == wanted {
                    let value = sample
                        .value
                        .to_f64()
                        .map_err(|e| RenderError::new(&sample.name, e, &family))?;
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    fn snapshot(
        &self,
        restrict: Option<&HashSet<String>>,
    ) -> (Vec<Arc<dyn Collector>>, Option<Labels>) {
        let inner = self.inner.read();
        let collectors = inner
            .collectors
            .values()
            .filter(|registration| match restrict {
                // Collectors that never described themselves may produce anything.
                Some(names) if !registration.names.is_empty() => {
                    registration.names.iter().any(|name| names.contains(name))
                }
                _ => true,
            })
            .map(|registration| Arc::clone(&registration.collector))
            .collect();
        (collectors, inner.target_info.clone())
    }
}

fn collect_all<F>(
    collectors: &[Arc<dyn Collector>],
    target_info: Option<Labels>,
    mut keep: F,
) -> Result<Vec<MetricFamily>, RegistryError>
where
    F: FnMut(MetricFamily) -> Option<MetricFamily>,
{
    let start = Instant::now();
    let mut seen = HashSet::new();
    let mut families = Vec::new();

    if let Some(labels) = target_info {
        seen.insert(TARGET_INFO.to_string());
        families.push(target_info_family(&labels));
    }

    for collector in collectors {
        for family in collector.collect().filter_map(&mut keep) {
            let exposed = family.exposed_names();
            let duplicates =
                exposed.iter().filter(|name| seen.contains(*name)).cloned().collect::<Vec<_>>();
            if !duplicates.is_empty() {
                return Err(RegistryError::Duplicate { names: duplicates, family: Box::new(family) });
            }
            seen.extend(exposed);
            families.push(family);
        }
    }

    trace!(families = families.len(), elapsed = ?start.elapsed(), "gathered metric families");
    Ok(families)
}

fn target_info_family(labels: &Labels) -> MetricFamily {
    let mut family = MetricFamily::info("target", "Target metadata");
    family.add_info(&[], labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    family
}

/// Gets the process-wide registry.
///
/// It is created on first use with auto-describe enabled, and lives for the rest of the process.
/// Use [`Registry::clear`] to reset it between tests.
pub fn default_registry() -> Arc<Registry> {
    Arc::clone(&DEFAULT_REGISTRY)
}
