use super::BinStore;
use crate::error::AppError;
use crate::model::{BinPatch, BinRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Process-local store for runs without a database.
///
/// The map lock is only held to find or insert a row; merges take the row's
/// own lock, so writers on different bins do not contend.
#[derive(Default)]
pub struct MemoryBinStore {
    rows: RwLock<HashMap<String, Arc<Mutex<BinRecord>>>>,
}

impl MemoryBinStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> AppError {
        AppError::Persistence("in-memory store lock poisoned".into())
    }
}

#[async_trait]
impl BinStore for MemoryBinStore {
    async fn upsert(&self, patch: &BinPatch) -> Result<BinRecord, AppError> {
        let existing = {
            let rows = self.rows.read().map_err(|_| Self::poisoned())?;
            rows.get(&patch.bin_id).cloned()
        };

        let row = match existing {
            Some(row) => row,
            None => {
                let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
                match rows.get(&patch.bin_id) {
                    Some(row) => row.clone(),
                    None => {
                        // First accepted reading: the row becomes visible already merged.
                        let mut record = BinRecord::new(patch.bin_id.clone());
                        record.apply(patch);
                        rows.insert(patch.bin_id.clone(), Arc::new(Mutex::new(record.clone())));
                        return Ok(record);
                    }
                }
            }
        };

        let mut record = row.lock().map_err(|_| Self::poisoned())?;
        let mut merged = record.clone();
        merged.apply(patch);
        *record = merged.clone();
        Ok(merged)
    }

    async fn get(&self, bin_id: &str) -> Result<Option<BinRecord>, AppError> {
        let row = {
            let rows = self.rows.read().map_err(|_| Self::poisoned())?;
            rows.get(bin_id).cloned()
        };
        match row {
            Some(row) => Ok(Some(row.lock().map_err(|_| Self::poisoned())?.clone())),
            None => Ok(None),
        }
    }

    async fn list_all(&self) -> Result<Vec<BinRecord>, AppError> {
        let rows: Vec<Arc<Mutex<BinRecord>>> = {
            let rows = self.rows.read().map_err(|_| Self::poisoned())?;
            rows.values().cloned().collect()
        };
        let mut records = rows
            .iter()
            .map(|row| row.lock().map(|r| r.clone()).map_err(|_| Self::poisoned()))
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| a.bin_id.cmp(&b.bin_id));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldValue, Property};
    use pretty_assertions::assert_eq;

    fn fill(bin: &str, v: f64) -> BinPatch {
        BinPatch::new(bin).with(Property::FillLevelPercentage, FieldValue::Decimal(Some(v)))
    }

    #[tokio::test]
    async fn test_create_then_merge() {
        let store = MemoryBinStore::new();
        let created = store.upsert(&fill("b1", 42.0)).await.unwrap();
        assert_eq!(created.fill_level_percentage, Some(42.0));
        assert_eq!(created.tilt_status, None);

        let merged = store
            .upsert(
                &BinPatch::new("b1")
                    .with(Property::TiltStatus, FieldValue::Text(Some("Active".into()))),
            )
            .await
            .unwrap();
        assert_eq!(merged.fill_level_percentage, Some(42.0));
        assert_eq!(merged.tilt_status.as_deref(), Some("Active"));
        assert_eq!(store.get("b1").await.unwrap(), Some(merged));
    }

    #[tokio::test]
    async fn test_get_missing_and_list_order() {
        let store = MemoryBinStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);

        for id in ["c", "a", "b"] {
            store.upsert(&fill(id, 1.0)).await.unwrap();
        }
        let ids: Vec<String> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.bin_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_bin_id_only_patch_creates_empty_record() {
        let store = MemoryBinStore::new();
        let rec = store.upsert(&BinPatch::new("lonely")).await.unwrap();
        assert_eq!(rec, BinRecord::new("lonely"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_disjoint_upserts_lose_nothing() {
        let store = Arc::new(MemoryBinStore::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let patch = if i % 2 == 0 {
                    BinPatch::new("shared")
                        .with(Property::Latitude, FieldValue::Decimal(Some(i as f64)))
                } else {
                    BinPatch::new("shared").with(
                        Property::DaysSinceLastEmptied,
                        FieldValue::Integer(Some(i)),
                    )
                };
                store.upsert(&patch).await.unwrap();
                store.upsert(&fill(&format!("other-{i}"), 5.0)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let shared = store.get("shared").await.unwrap().unwrap();
        assert!(shared.latitude.is_some());
        assert!(shared.days_since_last_emptied.is_some());
        assert_eq!(store.list_all().await.unwrap().len(), 51);
    }
}
