//! Collection descriptors and per-collection document counts.

use crate::store::SharedStore;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::warn;

/// Static description of a collection, used for selection and confirmation screens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

impl CollectionDescriptor {
    pub fn new(name: &str, label: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            description: description.to_string(),
        }
    }
}

/// Collections of the administration console.
pub fn default_descriptors() -> Vec<CollectionDescriptor> {
    vec![
        CollectionDescriptor::new("leads", "Leads", "Captured sales leads"),
        CollectionDescriptor::new("customers", "Customers", "Customer records"),
        CollectionDescriptor::new("invoices", "Invoices", "Invoices with bare-digit numbers"),
        CollectionDescriptor::new("customerInvoices", "Customer invoices", "Invoices issued from customer records"),
        CollectionDescriptor::new("tInvoices", "T-invoices", "Invoices numbered in the T- series"),
        CollectionDescriptor::new("products", "Products", "Product and price list"),
        CollectionDescriptor::new("payments", "Payments", "Recorded payments"),
        CollectionDescriptor::new("settings", "Settings", "Console settings"),
    ]
}

/// Document count of one collection, or the marker that counting failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionCount {
    Count(usize),
    Error,
}

impl Serialize for CollectionCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CollectionCount::Count(n) => serializer.serialize_u64(*n as u64),
            CollectionCount::Error => serializer.serialize_str("error"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CollectionStats(pub BTreeMap<String, CollectionCount>);

impl CollectionStats {
    pub fn get(&self, collection: &str) -> Option<CollectionCount> {
        self.0.get(collection).copied()
    }

    /// Sum over collections that were counted successfully.
    pub fn total(&self) -> usize {
        self.0
            .values()
            .map(|c| match c {
                CollectionCount::Count(n) => *n,
                CollectionCount::Error => 0,
            })
            .sum()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, c)| matches!(c, CollectionCount::Error))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Count documents per collection. A failing collection is reported, never fatal.
pub async fn scan(store: &SharedStore, names: &[String]) -> CollectionStats {
    let mut stats = BTreeMap::new();
    for name in names {
        let count = match store.list_ids(name).await {
            Ok(ids) => CollectionCount::Count(ids.len()),
            Err(e) => {
                warn!(collection = %name, "failed to count documents: {}", e);
                CollectionCount::Error
            }
        };
        stats.insert(name.clone(), count);
    }
    CollectionStats(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Fields, MemoryStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_scan_isolates_failures() {
        let memory = Arc::new(MemoryStore::new());
        memory.insert("leads", "1", Fields::new()).await;
        memory.insert("leads", "2", Fields::new()).await;
        memory.fail_reads("invoices").await;
        let store: SharedStore = memory;

        let names = vec!["leads".to_string(), "invoices".to_string(), "empty".to_string()];
        let stats = scan(&store, &names).await;

        assert_eq!(stats.get("leads"), Some(CollectionCount::Count(2)));
        assert_eq!(stats.get("invoices"), Some(CollectionCount::Error));
        assert_eq!(stats.get("empty"), Some(CollectionCount::Count(0)));
        assert_eq!(stats.total(), 2);
        assert_eq!(stats.failed(), vec!["invoices"]);
    }

    #[test]
    fn test_stats_serialize_error_sentinel() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), CollectionCount::Count(3));
        map.insert("b".to_string(), CollectionCount::Error);
        let json = serde_json::to_string(&CollectionStats(map)).unwrap();
        assert_eq!(json, r#"{"a":3,"b":"error"}"#);
    }

    #[test]
    fn test_default_descriptors_are_unique() {
        let descriptors = default_descriptors();
        let mut names: Vec<_> = descriptors.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), descriptors.len());
    }
}
