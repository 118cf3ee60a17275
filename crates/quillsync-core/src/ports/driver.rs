//! Storage driver port (driven/secondary port)
//!
//! Every back-end taking part in a sync - the local source tree, the
//! device whatever its transport, and the history snapshot store -
//! exposes this one capability surface. The planner and executor know
//! nothing else about a side.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because failures are adapter-specific
//!   (errno, protocol response codes, SQL errors); the executor wraps
//!   them with the subject path and stops at the first one.
//! - Operations are async but strictly serial: callers await each one
//!   before issuing the next, so implementations never see concurrent
//!   mutations.
//! - Back-ends that cannot mutate (history, mail for mkdir/remove)
//!   still implement the full trait and reject or no-op the calls, so
//!   any driver can sit on either side of a plan.

use async_trait::async_trait;

use crate::domain::{ObjectInfo, ObjectSet};

/// Uniform contract over sync back-ends.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Short stable name for logging.
    fn name(&self) -> &'static str;

    /// Stable identifier of the other side: hardware serial for device
    /// transports, sender address for mail, the driver name otherwise.
    /// Feeds history database naming.
    fn unique_id(&self) -> String;

    /// Enumerates everything the driver can see. May legitimately be
    /// empty (the mail transport has no view into device state).
    async fn enumerate(&self) -> anyhow::Result<ObjectSet>;

    /// Creates a single directory; parents must already exist. Fails
    /// when the path exists with an incompatible type.
    async fn mkdir(&self, obj: &ObjectInfo) -> anyhow::Result<()>;

    /// Removes one entry; never recurses.
    async fn remove(&self, obj: &ObjectInfo) -> anyhow::Result<()>;

    /// Copies `obj.object_name` (source path) to `obj.full_path`
    /// (destination path). Protocol transports record the new object
    /// handle internally on success.
    async fn copy(&self, obj: &ObjectInfo) -> anyhow::Result<()>;

    /// Releases resources; may trigger an eject attempt where the
    /// transport supports one.
    async fn disconnect(&self);
}
