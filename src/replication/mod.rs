//! Replication Module
//!
//! Asynchronous single-master replication at segment granularity. The
//! master answers requests for the segment after a given one; slaves poll
//! on an interval and apply what they receive.

mod master;
pub mod protocol;
mod slave;

pub use master::Master;
pub use protocol::{MasterResponse, SlaveRequest};
pub use slave::{Slave, SlaveState, SyncOutcome};

use crate::config::ReplicaRole;
use crate::shutdown::Shutdown;

/// Common trait for replication nodes
#[async_trait::async_trait]
pub trait ReplicationNode: Send + Sync {
    /// Role this node plays
    fn role(&self) -> ReplicaRole;

    /// Run until shutdown is signalled
    async fn start(&self, shutdown: Shutdown) -> crate::Result<()>;
}
