//! WAL Log Manager
//!
//! Turns batches of records into segment writes and segments back into
//! records.

use super::record::{decode_records, Record, WriteRequest};
use super::segment::SegmentStorage;
use crate::error::{Error, Result};

/// Encodes batches and drives the segment store
pub struct LogManager {
    store: Box<dyn SegmentStorage>,
}

impl LogManager {
    pub fn new(store: Box<dyn SegmentStorage>) -> Self {
        Self { store }
    }

    /// Persist a batch as one segment write and acknowledge every request in it
    pub(crate) fn write(&mut self, batch: Vec<WriteRequest>) {
        if batch.is_empty() {
            return;
        }

        let outcome = encode_batch(&batch).and_then(|data| self.store.write(&data));

        match outcome {
            Ok(()) => {
                tracing::trace!("Flushed {} WAL records", batch.len());
                for request in batch {
                    request.complete(Ok(()));
                }
            }
            Err(e) => {
                tracing::error!("WAL flush of {} records failed: {}", batch.len(), e);
                let reason = e.to_string();
                for request in batch {
                    request.complete(Err(Error::Wal(reason.clone())));
                }
            }
        }
    }

    /// Read every record from every segment, oldest first
    pub fn read_all(&self) -> Result<Vec<Record>> {
        let segments = self.store.read_all()?;
        let mut records = Vec::new();

        for (index, data) in segments.iter().enumerate() {
            let decoded = decode_records(data).map_err(|e| Error::WalCorrupted {
                segment: index,
                reason: e.to_string(),
            })?;
            records.extend(decoded);
        }

        tracing::debug!(
            "Read {} WAL records from {} segments",
            records.len(),
            segments.len()
        );
        Ok(records)
    }
}

/// Encode a batch in order; the first failure aborts the whole batch
fn encode_batch(batch: &[WriteRequest]) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    for request in batch {
        request.record.encode_into(&mut data)?;
    }
    Ok(data)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::wal::record::{encode_records, Command};
    use std::sync::{Arc, Mutex};

    /// In-memory store that records every write call
    #[derive(Clone, Default)]
    pub(crate) struct RecordingStore {
        pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
        pub fail_writes: bool,
        /// Blocks each write for this long, like a slow disk
        pub write_delay: Option<std::time::Duration>,
    }

    impl RecordingStore {
        pub fn write_calls(&self) -> Vec<Vec<Record>> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .map(|data| decode_records(data).unwrap())
                .collect()
        }
    }

    impl SegmentStorage for RecordingStore {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            if let Some(delay) = self.write_delay {
                std::thread::sleep(delay);
            }
            if self.fail_writes {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.writes.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        fn read_all(&self) -> Result<Vec<Vec<u8>>> {
            Ok(self.writes.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn test_write_batch_acknowledges_all() {
        let store = RecordingStore::default();
        let mut manager = LogManager::new(Box::new(store.clone()));

        let (first, first_done) = WriteRequest::new(Record::set("a", "1"));
        let (second, second_done) = WriteRequest::new(Record::delete("a"));
        manager.write(vec![first, second]);

        first_done.wait().await.unwrap();
        second_done.wait().await.unwrap();

        let calls = store.write_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec![Record::set("a", "1"), Record::delete("a")]);
    }

    #[tokio::test]
    async fn test_encode_failure_fails_batch_without_writing() {
        let store = RecordingStore::default();
        let mut manager = LogManager::new(Box::new(store.clone()));

        let (good, good_done) = WriteRequest::new(Record::set("a", "1"));
        let (bad, bad_done) = WriteRequest::new(Record {
            command: Command::Delete,
            args: vec![],
        });
        manager.write(vec![good, bad]);

        assert!(good_done.wait().await.is_err());
        assert!(bad_done.wait().await.is_err());
        assert!(store.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_reaches_every_record() {
        let store = RecordingStore {
            fail_writes: true,
            ..Default::default()
        };
        let mut manager = LogManager::new(Box::new(store));

        let (a, a_done) = WriteRequest::new(Record::set("a", "1"));
        let (b, b_done) = WriteRequest::new(Record::set("b", "2"));
        manager.write(vec![a, b]);

        for done in [a_done, b_done] {
            let err = done.wait().await.unwrap_err();
            assert!(err.to_string().contains("disk full"));
        }
    }

    #[test]
    fn test_read_all_concatenates_segments() {
        let store = RecordingStore::default();
        {
            let mut writes = store.writes.lock().unwrap();
            writes.push(encode_records(&[Record::set("a", "1"), Record::set("b", "2")]).unwrap());
            writes.push(encode_records(&[Record::delete("a")]).unwrap());
        }
        let manager = LogManager::new(Box::new(store));

        assert_eq!(
            manager.read_all().unwrap(),
            vec![Record::set("a", "1"), Record::set("b", "2"), Record::delete("a")]
        );
    }

    #[test]
    fn test_corrupt_segment_aborts_recovery() {
        let store = RecordingStore::default();
        {
            let mut writes = store.writes.lock().unwrap();
            writes.push(encode_records(&[Record::set("a", "1")]).unwrap());
            writes.push(vec![9, 9, 9]);
        }
        let manager = LogManager::new(Box::new(store));

        match manager.read_all() {
            Err(Error::WalCorrupted { segment, .. }) => assert_eq!(segment, 1),
            other => panic!("expected corruption error, got {:?}", other.map(|r| r.len())),
        }
    }
}
