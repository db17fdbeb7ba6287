//! Local fallback queue for writes that could not reach the document store.

pub mod pending_queue;

pub use pending_queue::{
    MemoryPendingWriteStore, PendingOp, PendingWrite, PendingWriteStore, QueueError, QueueResult,
    QueuedWrite, SqlitePendingWriteStore,
};
