use crate::errors::RecordStoreError;
use crate::files::{read_json_or_default, write_json_atomic};
use dsc_client::Report;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Destination of ingested data, read by the site that serves it.
pub trait RecordStore: Send + Sync {
    /// Inserts or replaces reports by id. Returns how many were new.
    fn upsert_reports(&self, reports: &[Report]) -> Result<usize, RecordStoreError>;
    /// Replaces the whole product catalog.
    fn replace_products(&self, products: Vec<Value>) -> Result<(), RecordStoreError>;
    fn report(&self, id: u64) -> Result<Option<Report>, RecordStoreError>;
    fn reports(&self) -> Result<Vec<Report>, RecordStoreError>;
    fn product_count(&self) -> Result<usize, RecordStoreError>;
}

fn upsert_into(map: &mut BTreeMap<u64, Report>, reports: &[Report]) -> usize {
    reports
        .iter()
        .filter(|report| map.insert(report.id, (*report).clone()).is_none())
        .count()
}

#[derive(Default)]
pub struct MemoryRecordStore {
    reports: RwLock<BTreeMap<u64, Report>>,
    products: RwLock<Vec<Value>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn upsert_reports(&self, reports: &[Report]) -> Result<usize, RecordStoreError> {
        Ok(upsert_into(&mut self.reports.write(), reports))
    }

    fn replace_products(&self, products: Vec<Value>) -> Result<(), RecordStoreError> {
        *self.products.write() = products;
        Ok(())
    }

    fn report(&self, id: u64) -> Result<Option<Report>, RecordStoreError> {
        Ok(self.reports.read().get(&id).cloned())
    }

    fn reports(&self) -> Result<Vec<Report>, RecordStoreError> {
        Ok(self.reports.read().values().cloned().collect())
    }

    fn product_count(&self) -> Result<usize, RecordStoreError> {
        Ok(self.products.read().len())
    }
}

/// Stores reports and products as two JSON files in `dir`.
pub struct FilesystemRecordStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

const REPORTS_FILE: &str = "reports.json";
const PRODUCTS_FILE: &str = "products.json";

impl FilesystemRecordStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        FilesystemRecordStore {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_reports(&self) -> Result<BTreeMap<u64, Report>, RecordStoreError> {
        read_json_or_default(&self.dir.join(REPORTS_FILE))
    }

    fn read_products(&self) -> Result<Vec<Value>, RecordStoreError> {
        read_json_or_default(&self.dir.join(PRODUCTS_FILE))
    }
}

impl RecordStore for FilesystemRecordStore {
    fn upsert_reports(&self, reports: &[Report]) -> Result<usize, RecordStoreError> {
        let _guard = self.lock.lock();
        let mut stored = self.read_reports()?;
        let inserted = upsert_into(&mut stored, reports);
        write_json_atomic::<_, RecordStoreError>(&self.dir.join(REPORTS_FILE), &stored)?;
        Ok(inserted)
    }

    fn replace_products(&self, products: Vec<Value>) -> Result<(), RecordStoreError> {
        let _guard = self.lock.lock();
        write_json_atomic(&self.dir.join(PRODUCTS_FILE), &products)
    }

    fn report(&self, id: u64) -> Result<Option<Report>, RecordStoreError> {
        let _guard = self.lock.lock();
        Ok(self.read_reports()?.remove(&id))
    }

    fn reports(&self) -> Result<Vec<Report>, RecordStoreError> {
        let _guard = self.lock.lock();
        Ok(self.read_reports()?.into_values().collect())
    }

    fn product_count(&self) -> Result<usize, RecordStoreError> {
        let _guard = self.lock.lock();
        Ok(self.read_products()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(id: u64, status: &str) -> Report {
        serde_json::from_value(json!({
            "id": id,
            "type": "shortage",
            "status": status,
            "shortage_reason": {"en_reason": "Manufacturing delay"}
        }))
        .unwrap()
    }

    fn exercise(store: &dyn RecordStore) {
        assert_eq!(
            store
                .upsert_reports(&[report(1, "active_confirmed"), report(2, "resolved")])
                .unwrap(),
            2
        );
        // Re-ingesting an updated report replaces it without counting as new.
        assert_eq!(store.upsert_reports(&[report(1, "resolved")]).unwrap(), 0);

        let stored = store.report(1).unwrap().unwrap();
        assert_eq!(stored.status.as_deref(), Some("resolved"));
        assert!(stored.extra.contains_key("shortage_reason"));
        assert!(store.report(3).unwrap().is_none());
        assert_eq!(store.reports().unwrap().len(), 2);

        assert_eq!(store.product_count().unwrap(), 0);
        store
            .replace_products(vec![json!({"drug_code": 1}), json!({"drug_code": 2})])
            .unwrap();
        store.replace_products(vec![json!({"drug_code": 3})]).unwrap();
        assert_eq!(store.product_count().unwrap(), 1);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryRecordStore::new());
    }

    #[test]
    fn test_filesystem_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemRecordStore::new(dir.path().join("records"));
        exercise(&store);

        let reopened = FilesystemRecordStore::new(dir.path().join("records"));
        assert_eq!(reopened.reports().unwrap().len(), 2);
        assert_eq!(reopened.product_count().unwrap(), 1);
        assert!(!dir.path().join("records").join("reports.json.tmp").exists());
    }
}
