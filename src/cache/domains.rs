//! Domain cache used for routing.
//!
//! Assignment is independent of publication state: a domain assigned to an
//! unpublished document stays visible here.

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::debug;

use crate::domain::domains::Domain;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::domains";

#[derive(Debug, Default)]
pub struct DomainCache {
    domains: RwLock<BTreeMap<i32, Domain>>,
}

impl DomainCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_domains(domains: impl IntoIterator<Item = Domain>) -> Self {
        let cache = Self::new();
        cache.replace_all(domains);
        cache
    }

    pub fn get_all(&self, include_wildcards: bool) -> Vec<Domain> {
        let domains = rw_read(&self.domains, SOURCE, "get_all");
        sorted(
            domains
                .values()
                .filter(|domain| include_wildcards || !domain.is_wildcard)
                .cloned()
                .collect(),
        )
    }

    pub fn get_assigned(&self, node_id: i32, include_wildcards: bool) -> Vec<Domain> {
        let domains = rw_read(&self.domains, SOURCE, "get_assigned");
        sorted(
            domains
                .values()
                .filter(|domain| domain.content_id == node_id)
                .filter(|domain| include_wildcards || !domain.is_wildcard)
                .cloned()
                .collect(),
        )
    }

    pub fn has_assigned(&self, node_id: i32, include_wildcards: bool) -> bool {
        rw_read(&self.domains, SOURCE, "has_assigned")
            .values()
            .any(|domain| {
                domain.content_id == node_id && (include_wildcards || !domain.is_wildcard)
            })
    }

    pub fn len(&self) -> usize {
        rw_read(&self.domains, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn replace_all(&self, domains: impl IntoIterator<Item = Domain>) {
        let replacement: BTreeMap<i32, Domain> =
            domains.into_iter().map(|domain| (domain.id, domain)).collect();
        let count = replacement.len();
        *rw_write(&self.domains, SOURCE, "replace_all") = replacement;
        debug!(target_module = SOURCE, count, "Replaced domain cache");
    }

    pub fn set(&self, domain: Domain) {
        let id = domain.id;
        rw_write(&self.domains, SOURCE, "set").insert(id, domain);
        debug!(target_module = SOURCE, domain_id = id, "Refreshed domain");
    }

    pub fn remove(&self, id: i32) -> Option<Domain> {
        let removed = rw_write(&self.domains, SOURCE, "remove").remove(&id);
        debug!(
            target_module = SOURCE,
            domain_id = id,
            found = removed.is_some(),
            "Removed domain"
        );
        removed
    }
}

fn sorted(mut domains: Vec<Domain>) -> Vec<Domain> {
    domains.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.id.cmp(&b.id)));
    domains
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> DomainCache {
        DomainCache::from_domains([
            Domain::new(1, "example.com", 100, "en-US"),
            Domain::new(2, "example.dk", 100, "da-DK"),
            Domain::new(3, "*100", 100, "en-US").wildcard(),
            Domain::new(4, "other.com", 200, "en-US"),
        ])
    }

    #[test]
    fn wildcards_are_filtered_on_request() {
        let cache = cache();
        assert_eq!(cache.get_all(true).len(), 4);
        assert_eq!(cache.get_all(false).len(), 3);
        assert_eq!(cache.get_assigned(100, false).len(), 2);
        assert_eq!(cache.get_assigned(100, true).len(), 3);
        assert!(cache.has_assigned(200, false));
        assert!(!cache.has_assigned(300, true));
    }

    #[test]
    fn set_and_remove() {
        let cache = cache();
        cache.set(Domain::new(4, "other.org", 300, "en-US"));
        assert!(!cache.has_assigned(200, true));
        assert!(cache.has_assigned(300, true));

        assert!(cache.remove(4).is_some());
        assert!(cache.remove(4).is_none());
        assert_eq!(cache.len(), 3);
    }
}
