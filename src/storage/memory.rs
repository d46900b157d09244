//! In-memory record store
//!
//! Offsets are sequence numbers. Nothing survives the process.

use std::collections::BTreeMap;

use super::errors::{StorageError, StorageResult};
use super::{RecordStore, WalOffset};
use crate::partition::{LocalId, Record, RecordRef};

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: BTreeMap<LocalId, Record>,
    next_offset: WalOffset,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn advance(&mut self) -> WalOffset {
        let offset = self.next_offset;
        self.next_offset += 1;
        offset
    }
}

impl RecordStore for MemoryRecordStore {
    fn durable_insert(&mut self, record: &Record) -> StorageResult<WalOffset> {
        self.records.insert(record.id, record.clone());
        Ok(self.advance())
    }

    fn durable_delete(&mut self, id: RecordRef) -> StorageResult<WalOffset> {
        self.records.remove(&id.local_id);
        Ok(self.advance())
    }

    fn hydrate(&self, ids: &[RecordRef]) -> StorageResult<Vec<Record>> {
        ids.iter()
            .map(|id| {
                self.records
                    .get(&id.local_id)
                    .cloned()
                    .ok_or_else(|| StorageError::record_unknown(id.local_id))
            })
            .collect()
    }

    fn live_records(&self) -> StorageResult<Vec<Record>> {
        Ok(self.records.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: LocalId) -> Record {
        Record::new(u128::from(id) * 10, id, vec![i64::from(id)], vec![], vec![])
    }

    #[test]
    fn test_offsets_are_sequential() {
        let mut store = MemoryRecordStore::new();
        assert_eq!(store.durable_insert(&record(1)).unwrap(), 0);
        assert_eq!(store.durable_insert(&record(2)).unwrap(), 1);
        assert_eq!(store.durable_delete(RecordRef::new(0, 1)).unwrap(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_hydrate_preserves_request_order() {
        let mut store = MemoryRecordStore::new();
        for id in 1..=3 {
            store.durable_insert(&record(id)).unwrap();
        }
        let got = store
            .hydrate(&[RecordRef::new(9, 3), RecordRef::new(9, 1)])
            .unwrap();
        assert_eq!(got.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 1]);
        assert!(store.hydrate(&[RecordRef::new(0, 8)]).is_err());
    }
}
