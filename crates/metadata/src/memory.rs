//! In-process metadata store.

use crate::error::MetadataResult;
use crate::models::{EntryRow, NewEntry};
use crate::repos::{CatalogStats, DecrementOutcome, EntryFilter, EntryRepo, Pagination};
use crate::store::MetadataStore;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::cmp::Reverse;
use uuid::Uuid;

/// Catalog held in memory. Contents are lost when the process exits.
///
/// Rows are keyed by digest; reference count changes take the digest's shard
/// lock, so operations on different digests do not contend. When both maps
/// are touched, `entries` is always locked before `ids`.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, EntryRow>,
    ids: DashMap<Uuid, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self, filter: &EntryFilter) -> Vec<EntryRow> {
        self.entries
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl EntryRepo for MemoryStore {
    async fn find_by_digest(&self, digest: &str) -> MetadataResult<Option<EntryRow>> {
        Ok(self.entries.get(digest).map(|row| row.value().clone()))
    }

    async fn get_entry(&self, id: Uuid) -> MetadataResult<Option<EntryRow>> {
        let Some(digest) = self.ids.get(&id).map(|d| d.value().clone()) else {
            return Ok(None);
        };
        Ok(self
            .entries
            .get(&digest)
            .filter(|row| row.id == id)
            .map(|row| row.value().clone()))
    }

    async fn create_or_increment(&self, entry: &NewEntry) -> MetadataResult<(EntryRow, bool)> {
        match self.entries.entry(entry.digest.clone()) {
            Entry::Occupied(mut occupied) => {
                let row = occupied.get_mut();
                row.reference_count += 1;
                Ok((row.clone(), false))
            }
            Entry::Vacant(vacant) => {
                let row = entry.clone().into_row();
                self.ids.insert(row.id, row.digest.clone());
                vacant.insert(row.clone());
                Ok((row, true))
            }
        }
    }

    async fn decrement_or_delete(
        &self,
        digest: &str,
        id: Uuid,
    ) -> MetadataResult<DecrementOutcome> {
        match self.entries.entry(digest.to_string()) {
            Entry::Occupied(occupied) if occupied.get().id != id => {
                Ok(DecrementOutcome::NotFound)
            }
            Entry::Occupied(mut occupied) => {
                if occupied.get().reference_count > 1 {
                    let row = occupied.get_mut();
                    row.reference_count -= 1;
                    Ok(DecrementOutcome::Decremented(row.clone()))
                } else {
                    let row = occupied.remove();
                    self.ids.remove(&row.id);
                    Ok(DecrementOutcome::Deleted(row))
                }
            }
            Entry::Vacant(_) => Ok(DecrementOutcome::NotFound),
        }
    }

    async fn delete_entry(&self, id: Uuid) -> MetadataResult<Option<EntryRow>> {
        let Some(digest) = self.ids.get(&id).map(|d| d.value().clone()) else {
            return Ok(None);
        };
        let removed = self
            .entries
            .remove_if(&digest, |_, row| row.id == id)
            .map(|(_, row)| row);
        if removed.is_some() {
            self.ids.remove(&id);
        }
        Ok(removed)
    }

    async fn list_entries(
        &self,
        filter: &EntryFilter,
        page: Pagination,
    ) -> MetadataResult<Vec<EntryRow>> {
        let mut rows = self.snapshot(filter);
        rows.sort_by_key(|row| (Reverse(row.created_at), row.id));
        Ok(rows
            .into_iter()
            .skip(usize::try_from(page.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(page.limit).unwrap_or(usize::MAX))
            .collect())
    }

    async fn count_entries(&self, filter: &EntryFilter) -> MetadataResult<u64> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .count() as u64)
    }

    async fn aggregate_stats(&self) -> MetadataResult<CatalogStats> {
        let mut stats = CatalogStats::default();
        for entry in self.entries.iter() {
            stats.add(entry.value());
        }
        Ok(stats)
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn migrate(&self) -> MetadataResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn new_entry(digest: &str) -> NewEntry {
        NewEntry {
            id: Uuid::new_v4(),
            digest: digest.to_string(),
            object_key: format!("uploads/{digest}"),
            original_name: "a.txt".to_string(),
            content_type: "text/plain".to_string(),
            size_bytes: 5,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_id_index_follows_entries() {
        let store = MemoryStore::new();
        let first = new_entry("aa");
        let (row, created) = store.create_or_increment(&first).await.unwrap();
        assert!(created);
        assert_eq!(store.get_entry(row.id).await.unwrap(), Some(row.clone()));

        let second = new_entry("aa");
        let (_, created) = store.create_or_increment(&second).await.unwrap();
        assert!(!created);
        // The losing id was never indexed.
        assert!(store.get_entry(second.id).await.unwrap().is_none());

        store.decrement_or_delete("aa", row.id).await.unwrap();
        let outcome = store.decrement_or_delete("aa", row.id).await.unwrap();
        assert!(matches!(outcome, DecrementOutcome::Deleted(_)));
        assert!(store.get_entry(row.id).await.unwrap().is_none());
        assert!(store.ids.is_empty());
    }

    #[tokio::test]
    async fn test_delete_entry_ignores_reused_digest() {
        let store = MemoryStore::new();
        let first = new_entry("bb");
        store.create_or_increment(&first).await.unwrap();
        store.decrement_or_delete("bb", first.id).await.unwrap();

        let second = new_entry("bb");
        store.create_or_increment(&second).await.unwrap();

        // Rolling back the first id must not touch the second entry.
        assert!(store.delete_entry(first.id).await.unwrap().is_none());
        assert!(store.get_entry(second.id).await.unwrap().is_some());
    }
}
