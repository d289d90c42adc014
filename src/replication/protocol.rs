//! Replication Protocol
//!
//! Messages exchanged between a slave and its master. Each sync is one
//! request/response round trip carried in a network frame.

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Decoder limit; a response carries at most one segment
const MAX_MESSAGE_SIZE: u64 = 1024 * 1024 * 1024;

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_MESSAGE_SIZE)
}

/// Sent by a slave on every sync tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveRequest {
    /// Newest segment the slave has saved ("" when it has none)
    pub last_segment_name: String,
    /// Bytes the slave holds of that segment
    pub last_segment_size: u64,
}

/// Master reply to a `SlaveRequest`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterResponse {
    pub succeeded: bool,
    /// Segment being shipped ("" when nothing is newer)
    pub segment_name: String,
    /// Full contents of that segment
    pub segment_data: Vec<u8>,
}

impl SlaveRequest {
    pub fn new(last_segment_name: impl Into<String>, last_segment_size: u64) -> Self {
        Self {
            last_segment_name: last_segment_name.into(),
            last_segment_size,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(codec().serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(codec().deserialize(bytes)?)
    }
}

impl MasterResponse {
    /// The master could not serve the request
    pub fn failed() -> Self {
        Self::default()
    }

    /// The slave is up to date
    pub fn nothing_newer() -> Self {
        Self {
            succeeded: true,
            ..Self::default()
        }
    }

    /// Ship a segment
    pub fn segment(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            succeeded: true,
            segment_name: name.into(),
            segment_data: data,
        }
    }

    pub fn has_segment(&self) -> bool {
        self.succeeded && !self.segment_name.is_empty()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(codec().serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(codec().deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = SlaveRequest::new("wal_1700000000000.log", 42);
        let restored = SlaveRequest::deserialize(&request.serialize().unwrap()).unwrap();
        assert_eq!(restored, request);
    }

    #[test]
    fn test_response_kinds() {
        assert!(!MasterResponse::failed().succeeded);
        assert!(!MasterResponse::nothing_newer().has_segment());

        let response = MasterResponse::segment("wal_1.log", vec![1, 2, 3]);
        assert!(response.has_segment());
        let restored = MasterResponse::deserialize(&response.serialize().unwrap()).unwrap();
        assert_eq!(restored, response);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(MasterResponse::deserialize(&[0xff; 3]).is_err());
    }
}
