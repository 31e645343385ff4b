//! Sequence allocation over collections that share a numbering namespace.
//!
//! There is no central counter: the next value is derived by scanning every
//! member collection, then re-validated against a fresh read before it is handed
//! out. This narrows the window in which a concurrent writer can take the same
//! value but does not close it; callers persisting an identifier should use
//! [`SequenceAllocator::assign`] or re-check with `is_available` right before writing.

use super::namespace::{Identifier, Namespace};
use crate::store::{Fields, SharedStore};
use crate::utils::{Result, VaultError};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

const DEFAULT_MAX_REVALIDATIONS: u32 = 32;

#[derive(Clone)]
pub struct SequenceAllocator {
    store: SharedStore,
    max_revalidations: u32,
}

impl SequenceAllocator {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            max_revalidations: DEFAULT_MAX_REVALIDATIONS,
        }
    }

    pub fn with_max_revalidations(mut self, max_revalidations: u32) -> Self {
        self.max_revalidations = max_revalidations.max(1);
        self
    }

    /// Every value currently in use across the namespace's member collections.
    ///
    /// A failed read is returned as an error; it is never folded into the set.
    pub async fn used_values(&self, ns: &Namespace) -> Result<BTreeSet<u64>> {
        // Several sources may live in the same collection; list each collection once.
        let mut by_collection: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for source in &ns.sources {
            by_collection
                .entry(source.collection.as_str())
                .or_default()
                .push(source.field.as_str());
        }

        let mut used = BTreeSet::new();
        for (collection, fields) in by_collection {
            let docs = self
                .store
                .list(collection)
                .await
                .map_err(|e| VaultError::store(collection, "list", e))?;
            for doc in &docs {
                for field in &fields {
                    if let Some(value) = doc.fields.get(*field).and_then(|v| ns.conform(v)) {
                        used.insert(value);
                    }
                }
            }
        }
        Ok(used)
    }

    /// Compute the next free identifier of `ns`.
    pub async fn next(&self, ns: &Namespace) -> Result<Identifier> {
        let mut used = self.used_values(ns).await?;
        let mut candidate = match used.iter().next_back() {
            None => ns.start,
            Some(&max) => Self::successor(ns, max.max(ns.floor()))?,
        };

        for attempt in 0..self.max_revalidations {
            while used.contains(&candidate) {
                candidate = Self::successor(ns, candidate)?;
            }

            let live = self.used_values(ns).await?;
            if !live.contains(&candidate) {
                let id = ns.identifier(candidate);
                debug!(namespace = %ns.name, attempt, "allocated {}", id);
                return Ok(id);
            }

            warn!(
                namespace = %ns.name,
                attempt,
                "candidate {} was taken by a concurrent writer, retrying",
                ns.format(candidate)
            );
            used.extend(live);
        }

        Err(VaultError::AllocationExhausted {
            namespace: ns.name.clone(),
            attempts: self.max_revalidations,
        })
    }

    /// Whether `candidate` (in the namespace's textual shape) is unused right now.
    pub async fn is_available(&self, ns: &Namespace, candidate: &str) -> Result<bool> {
        let value = ns.parse_candidate(candidate)?;
        self.is_value_available(ns, value).await
    }

    pub async fn is_value_available(&self, ns: &Namespace, value: u64) -> Result<bool> {
        Ok(!self.used_values(ns).await?.contains(&value))
    }

    /// Allocate an identifier, write it into `fields`, and persist the document.
    ///
    /// Re-checks availability right before the write and falls back to a fresh
    /// allocation when the value was taken in between.
    pub async fn assign(
        &self,
        ns: &Namespace,
        collection: &str,
        doc_id: &str,
        mut fields: Fields,
    ) -> Result<Identifier> {
        let field = ns
            .sources
            .iter()
            .find(|s| s.collection == collection)
            .map(|s| s.field.clone())
            .ok_or_else(|| {
                VaultError::Config(format!(
                    "collection '{collection}' is not a member of namespace '{}'",
                    ns.name
                ))
            })?;

        for attempt in 0..self.max_revalidations {
            let id = self.next(ns).await?;
            if !self.is_value_available(ns, id.value).await? {
                warn!(namespace = %ns.name, attempt, "{} taken before write-back, reallocating", id);
                continue;
            }
            fields.insert(field.clone(), Value::String(id.text.clone()));
            self.store
                .set(collection, doc_id, fields)
                .await
                .map_err(|e| VaultError::store(collection, "set", e))?;
            info!(namespace = %ns.name, collection, doc_id, "assigned {}", id);
            return Ok(id);
        }

        Err(VaultError::AllocationExhausted {
            namespace: ns.name.clone(),
            attempts: self.max_revalidations,
        })
    }

    fn successor(ns: &Namespace, value: u64) -> Result<u64> {
        value
            .checked_add(1)
            .filter(|next| *next <= ns.max_value())
            .ok_or_else(|| VaultError::AllocationExhausted {
                namespace: ns.name.clone(),
                attempts: 0,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, MemoryStore, StoredDocument};
    use serde_json::json;
    use std::sync::Arc;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn seeded(entries: &[(&str, &str, serde_json::Value)]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (collection, id, value) in entries {
            store.insert(collection, id, fields(value.clone())).await;
        }
        store
    }

    #[tokio::test]
    async fn test_next_on_empty_namespace_returns_start() {
        let store = Arc::new(MemoryStore::new());
        let allocator = SequenceAllocator::new(store);

        let customer = allocator.next(&Namespace::customer()).await.unwrap();
        assert_eq!(customer.value, 101_660);
        assert_eq!(customer.text, "101660");

        let t = allocator.next(&Namespace::t_series()).await.unwrap();
        assert_eq!(t.text, "T-100001");
    }

    #[tokio::test]
    async fn test_next_skips_used_values_across_collections() {
        let store = seeded(&[
            ("invoices", "a", json!({"invoiceNumber": "101660"})),
            ("invoices", "b", json!({"invoiceNumber": 101662})),
            ("customerInvoices", "c", json!({"invoiceNumber": "101663"})),
            ("invoices", "d", json!({"invoiceNumber": null})),
            ("invoices", "e", json!({"other": "999999"})),
        ])
        .await;
        let allocator = SequenceAllocator::new(store);
        let ns = Namespace::customer();

        let used = allocator.used_values(&ns).await.unwrap();
        let id = allocator.next(&ns).await.unwrap();
        assert_eq!(id.value, 101_664);
        assert!(!used.contains(&id.value));
    }

    #[tokio::test]
    async fn test_floor_bounds_sparse_data() {
        let store = seeded(&[("invoices", "a", json!({"invoiceNumber": "7"}))]).await;
        let allocator = SequenceAllocator::new(store);
        assert_eq!(allocator.next(&Namespace::customer()).await.unwrap().value, 101_660);
    }

    #[tokio::test]
    async fn test_t_series_ignores_foreign_prefix() {
        let store = seeded(&[
            ("tInvoices", "a", json!({"invoiceNumber": "T-100010"})),
            ("tInvoices", "b", json!({"invoiceNumber": "Q-999999"})),
            ("invoices", "c", json!({"tNumber": "100004"})),
        ])
        .await;
        let allocator = SequenceAllocator::new(store);
        assert_eq!(allocator.next(&Namespace::t_series()).await.unwrap().text, "T-100011");
    }

    #[tokio::test]
    async fn test_persisted_value_is_no_longer_available() {
        let store = Arc::new(MemoryStore::new());
        let allocator = SequenceAllocator::new(store.clone());
        let ns = Namespace::t_series();

        let id = allocator.next(&ns).await.unwrap();
        assert!(allocator.is_available(&ns, &id.text).await.unwrap());

        store
            .set("tInvoices", "inv-1", fields(json!({"invoiceNumber": id.text.clone()})))
            .await
            .unwrap();
        assert!(!allocator.is_available(&ns, &id.text).await.unwrap());
        assert!(!allocator.is_value_available(&ns, id.value).await.unwrap());
    }

    #[tokio::test]
    async fn test_revalidation_skips_value_taken_concurrently() {
        let store = seeded(&[("invoices", "a", json!({"invoiceNumber": "101700"}))]).await;
        // The initial scan lists two collections; the concurrent write lands right after it.
        store
            .insert_after_lists(
                2,
                "customerInvoices",
                StoredDocument::new("rival", fields(json!({"invoiceNumber": "101701"}))),
            )
            .await;

        let allocator = SequenceAllocator::new(store);
        let id = allocator.next(&Namespace::customer()).await.unwrap();
        assert_eq!(id.value, 101_702);
    }

    #[tokio::test]
    async fn test_read_failure_is_surfaced_not_treated_as_taken() {
        let store = seeded(&[("invoices", "a", json!({"invoiceNumber": "101700"}))]).await;
        store.fail_reads("customerInvoices").await;
        let allocator = SequenceAllocator::new(store);
        let ns = Namespace::customer();

        match allocator.next(&ns).await {
            Err(VaultError::Store { collection, operation, .. }) => {
                assert_eq!(collection, "customerInvoices");
                assert_eq!(operation, "list");
            }
            other => panic!("expected store error, got {other:?}"),
        }
        assert!(allocator.is_available(&ns, "101999").await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_candidate_rejected() {
        let allocator = SequenceAllocator::new(Arc::new(MemoryStore::new()));
        let result = allocator.is_available(&Namespace::t_series(), "X-100001").await;
        assert!(matches!(result, Err(VaultError::InvalidIdentifier { .. })));
    }

    #[tokio::test]
    async fn test_assign_writes_identifier_field() {
        let store = Arc::new(MemoryStore::new());
        let allocator = SequenceAllocator::new(store.clone());
        let ns = Namespace::t_series();

        let first = allocator
            .assign(&ns, "tInvoices", "inv-1", fields(json!({"customer": "Acme"})))
            .await
            .unwrap();
        let second = allocator
            .assign(&ns, "tInvoices", "inv-2", Fields::new())
            .await
            .unwrap();

        assert_eq!(first.text, "T-100001");
        assert_eq!(second.text, "T-100002");
        let stored = store.get("tInvoices", "inv-1").await.unwrap().unwrap();
        assert_eq!(stored["invoiceNumber"], json!("T-100001"));
        assert_eq!(stored["customer"], json!("Acme"));
    }

    #[tokio::test]
    async fn test_assign_rejects_non_member_collection() {
        let allocator = SequenceAllocator::new(Arc::new(MemoryStore::new()));
        let result = allocator
            .assign(&Namespace::customer(), "leads", "x", Fields::new())
            .await;
        assert!(matches!(result, Err(VaultError::Config(_))));
    }

    #[tokio::test]
    async fn test_overflow_reports_exhaustion() {
        let store = seeded(&[("invoices", "a", json!({"invoiceNumber": u64::MAX}))]).await;
        let allocator = SequenceAllocator::new(store);
        assert!(matches!(
            allocator.next(&Namespace::customer()).await,
            Err(VaultError::AllocationExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_t_series_exhausts_after_six_digits() {
        let store = seeded(&[("tInvoices", "a", json!({"invoiceNumber": "T-999998"}))]).await;
        let allocator = SequenceAllocator::new(store.clone());
        let ns = Namespace::t_series();
        assert_eq!(allocator.next(&ns).await.unwrap().text, "T-999999");

        store.insert("tInvoices", "b", fields(json!({"invoiceNumber": "T-999999"}))).await;
        assert!(matches!(
            allocator.next(&ns).await,
            Err(VaultError::AllocationExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_customer_ignores_prefixed_values() {
        let store = seeded(&[
            ("invoices", "a", json!({"invoiceNumber": "101690"})),
            ("invoices", "b", json!({"invoiceNumber": "T-101700"})),
            ("customerInvoices", "c", json!({"invoiceNumber": "INV-101800"})),
        ])
        .await;
        let allocator = SequenceAllocator::new(store);
        let ns = Namespace::customer();

        assert_eq!(allocator.next(&ns).await.unwrap().text, "101691");
        assert!(allocator.is_available(&ns, "101700").await.unwrap());
        assert!(matches!(
            allocator.is_available(&ns, "T-101661").await,
            Err(VaultError::InvalidIdentifier { .. })
        ));
        assert!(allocator.is_available(&ns, "INV-9").await.is_err());
    }
}
