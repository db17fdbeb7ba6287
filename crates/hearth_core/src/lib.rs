//! Event store core for the Hearth family organizer.
//! This crate is the single source of truth for event invariants.

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod notify;
pub mod queue;
pub mod repo;
pub mod service;

pub use cache::EventCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, StoreConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use error::{StoreError, StoreResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::event::{DateRange, Document, Event, EventAction, OwnerScope, RawRecord};
pub use model::patch::EventPatch;
pub use model::raw::{RawEvent, RawTime};
pub use normalize::Normalizer;
pub use notify::{ChangeBroadcast, Subscription};
pub use queue::{
    MemoryPendingWriteStore, PendingOp, PendingWrite, PendingWriteStore, QueuedWrite,
    SqlitePendingWriteStore,
};
pub use repo::event_repo::{EventRepository, RepoError, RepoResult};
pub use repo::memory_repo::MemoryEventRepository;
pub use repo::sqlite_repo::SqliteEventRepository;
pub use service::event_store::{
    AddOutcome, EventStore, ListOutcome, ListSource, ReplayReport, StoreHealth,
};
pub use service::response::{ActionResponse, ListResponse, ReplayResponse};
