use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use super::{NewUrlRecord, SaveUrlError, UrlRecord, UrlStore};
use crate::short_code::ShortCode;

/// [`UrlStore`] kept entirely in process memory.
///
/// Inserts go through the `DashMap` entry API, so two concurrent saves of the same
/// code cannot both succeed.
#[derive(Debug, Default)]
pub struct InMemoryUrlStore {
    records: DashMap<ShortCode, UrlRecord>,
}

impl InMemoryUrlStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every stored record, expired or not.
    #[must_use]
    pub fn records(&self) -> Vec<UrlRecord> {
        self.records.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[async_trait]
impl UrlStore for InMemoryUrlStore {
    async fn exists_by_code(&self, code: &ShortCode) -> anyhow::Result<bool> {
        Ok(self.records.contains_key(code))
    }

    #[instrument(skip(self))]
    async fn save(&self, record: NewUrlRecord) -> Result<UrlRecord, SaveUrlError> {
        match self.records.entry(record.short_code.clone()) {
            Entry::Occupied(_) => Err(SaveUrlError::CodeTaken(record.short_code)),
            Entry::Vacant(vacant) => {
                let saved = UrlRecord {
                    id: Uuid::new_v4().to_string(),
                    short_code: record.short_code,
                    original_url: record.original_url,
                    expires_at: record.expires_at,
                    created_at: OffsetDateTime::now_utc(),
                };
                vacant.insert(saved.clone());
                Ok(saved)
            }
        }
    }

    async fn find_by_code(&self, code: &ShortCode) -> anyhow::Result<Option<UrlRecord>> {
        Ok(self.records.get(code).map(|entry| entry.value().clone()))
    }

    #[instrument(skip(self))]
    async fn delete_expired(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let mut removed = 0;
        self.records.retain(|_, record| {
            let keep = !record.is_expired_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
