//! WAL Record Types
//!
//! Defines the mutations that are written to the WAL and shipped to
//! slaves, plus the self-delimiting codec used for segment contents.

use std::io::Cursor;

use bincode::Options;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Mutation kind carried by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// args = [key, value]
    Set,
    /// args = [key]
    Delete,
}

impl Command {
    /// Number of arguments a well-formed record carries
    pub fn arity(&self) -> usize {
        match self {
            Command::Set => 2,
            Command::Delete => 1,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Set => write!(f, "SET"),
            Command::Delete => write!(f, "DEL"),
        }
    }
}

/// A durable log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub command: Command,
    pub args: Vec<String>,
}

/// Segment codec: fixed-width integers and length-prefixed strings, so each
/// record delimits itself and records can be concatenated without framing.
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

impl Record {
    /// Create a SET record
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            command: Command::Set,
            args: vec![key.into(), value.into()],
        }
    }

    /// Create a DELETE record
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            command: Command::Delete,
            args: vec![key.into()],
        }
    }

    /// Key affected by this record
    pub fn key(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Check the argument count against the command
    pub fn validate(&self) -> Result<()> {
        if self.args.len() != self.command.arity() {
            return Err(Error::Wal(format!(
                "{} record expects {} arguments, got {}",
                self.command,
                self.command.arity(),
                self.args.len()
            )));
        }
        Ok(())
    }

    /// Append the encoded record to `buffer`
    pub fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.validate()?;
        codec().serialize_into(buffer, self)?;
        Ok(())
    }

    /// Decode one record at the cursor, advancing it past the record
    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let remaining = cursor.get_ref().len() as u64 - cursor.position();
        let record: Record = codec().with_limit(remaining).deserialize_from(&mut *cursor)?;
        record.validate()?;
        Ok(record)
    }
}

/// Encode a sequence of records into one contiguous buffer
pub fn encode_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    for record in records {
        record.encode_into(&mut buffer)?;
    }
    Ok(buffer)
}

/// Decode every record in `data`; any malformed record fails the whole buffer
pub fn decode_records(data: &[u8]) -> Result<Vec<Record>> {
    let mut cursor = Cursor::new(data);
    let mut records = Vec::new();

    while (cursor.position() as usize) < data.len() {
        let offset = cursor.position();
        let record = Record::decode_from(&mut cursor)
            .map_err(|e| Error::Wal(format!("record at offset {}: {}", offset, e)))?;
        records.push(record);
    }

    Ok(records)
}

/// A record waiting in the pending buffer together with its completion
pub(crate) struct WriteRequest {
    pub record: Record,
    done: oneshot::Sender<Result<()>>,
}

impl WriteRequest {
    pub fn new(record: Record) -> (Self, Completion) {
        let (done, rx) = oneshot::channel();
        (Self { record, done }, Completion { rx })
    }

    /// Resolve the completion; consuming `self` makes a second resolution impossible
    pub fn complete(self, result: Result<()>) {
        // The caller may have stopped waiting
        let _ = self.done.send(result);
    }
}

/// Durability acknowledgement for one buffered record
#[must_use = "a record is only durable once its completion resolves"]
pub struct Completion {
    rx: oneshot::Receiver<Result<()>>,
}

impl Completion {
    /// Wait until the batch containing the record has been flushed
    pub async fn wait(self) -> Result<()> {
        self.rx.await.map_err(|_| Error::ShuttingDown)?
    }
}
