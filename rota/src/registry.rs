//! Interning of metric identities.
//!
//! Every collection owns a [`MetricRegistry`] that maps each distinct
//! [`MetricInfo`] it has seen to a stable [`MetricId`]. Downstream maps key
//! by the id rather than re-hashing the full identity on every sample.
//!
//! # Registration Flow
//!
//! 1. Caller passes the identity read off the wire
//! 2. If an equal identity was registered before, its id is returned
//! 3. Otherwise the identity is stored, indexed by path, and given the next id
//!
//! Identities are never evicted; they live as long as the owning collection.

use std::collections::HashMap;
use std::sync::Arc;

use crate::metric::MetricInfo;

/// Opaque, `Copy` handle for an interned metric identity.
///
/// Only meaningful within the registry that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(usize);

impl MetricId {
    /// Position of this id in registration order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Content-addressed table of metric identities.
///
/// # Thread Safety
///
/// The registry is not synchronized. Collections keep it behind their own
/// lock.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    /// Identity to id.
    by_info: HashMap<Arc<MetricInfo>, MetricId>,
    /// Id to identity, in registration order.
    infos: Vec<Arc<MetricInfo>>,
    /// Path to every id registered under it.
    by_path: HashMap<String, Vec<MetricId>>,
}

impl MetricRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical id and shared identity for `info`.
    ///
    /// Always succeeds. Equal identities yield the same id.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rota::metric::{Kind, MetricInfo, Unit};
    /// use rota::registry::MetricRegistry;
    ///
    /// let mut registry = MetricRegistry::new();
    /// let info = MetricInfo::new("/proc/cpu", "CPU", Unit::None, Kind::Float, 64);
    /// let (first, _) = registry.register(&info);
    /// let (second, _) = registry.register(&info.clone());
    /// assert_eq!(first, second);
    /// ```
    pub fn register(&mut self, info: &MetricInfo) -> (MetricId, Arc<MetricInfo>) {
        if let Some((existing, id)) = self.by_info.get_key_value(info) {
            return (*id, Arc::clone(existing));
        }

        let id = MetricId(self.infos.len());
        let shared = Arc::new(info.clone());
        self.by_info.insert(Arc::clone(&shared), id);
        self.infos.push(Arc::clone(&shared));
        self.by_path
            .entry(shared.path().to_string())
            .or_default()
            .push(id);

        (id, shared)
    }

    /// Returns the identity for an id issued by this registry.
    pub fn get(&self, id: MetricId) -> Option<&Arc<MetricInfo>> {
        self.infos.get(id.0)
    }

    /// Returns the id of `info` without registering it.
    pub fn lookup(&self, info: &MetricInfo) -> Option<MetricId> {
        self.by_info.get(info).copied()
    }

    /// Returns every id registered under `path`, oldest first.
    pub fn by_path(&self, path: &str) -> &[MetricId] {
        self.by_path.get(path).map_or(&[], Vec::as_slice)
    }

    /// Iterates over all registered identities in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (MetricId, &Arc<MetricInfo>)> {
        self.infos
            .iter()
            .enumerate()
            .map(|(index, info)| (MetricId(index), info))
    }

    /// Returns the number of distinct identities registered.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns `true` if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{Kind, Unit};

    fn info(path: &str, unit: Unit) -> MetricInfo {
        MetricInfo::new(path, "test metric", unit, Kind::Float, 64)
    }

    #[test]
    fn test_register_interns_equal_identities() {
        let mut registry = MetricRegistry::new();

        let (a, shared_a) = registry.register(&info("/a", Unit::None));
        let (b, shared_b) = registry.register(&info("/a", Unit::None));

        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&shared_a, &shared_b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_path_different_unit() {
        let mut registry = MetricRegistry::new();

        let (seconds, _) = registry.register(&info("/uptime", Unit::Second));
        let (millis, _) = registry.register(&info("/uptime", Unit::Millisecond));
        let (other, _) = registry.register(&info("/load", Unit::None));

        assert_ne!(seconds, millis);
        assert_eq!(registry.by_path("/uptime"), &[seconds, millis]);
        assert_eq!(registry.by_path("/load"), &[other]);
        assert!(registry.by_path("/missing").is_empty());
    }

    #[test]
    fn test_get_and_lookup() {
        let mut registry = MetricRegistry::new();
        assert!(registry.is_empty());

        let (id, _) = registry.register(&info("/a", Unit::Byte));
        assert_eq!(registry.get(id).map(|i| i.path()), Some("/a"));
        assert_eq!(registry.lookup(&info("/a", Unit::Byte)), Some(id));
        assert_eq!(registry.lookup(&info("/a", Unit::None)), None);
    }

    #[test]
    fn test_iter_in_registration_order() {
        let mut registry = MetricRegistry::new();
        registry.register(&info("/b", Unit::None));
        registry.register(&info("/a", Unit::None));

        let paths: Vec<_> = registry.iter().map(|(_, i)| i.path().to_string()).collect();
        assert_eq!(paths, vec!["/b", "/a"]);
    }
}
