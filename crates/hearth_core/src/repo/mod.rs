//! Persistence adapter boundary and implementations.
//!
//! # Responsibility
//! - Define the document-store contract consumed by the coordinator.
//! - Provide SQLite and in-memory implementations of it.
//!
//! # Invariants
//! - Adapters store bags as given; they never normalize.
//! - Adapters return semantic errors (`NotFound`) in addition to transport
//!   errors (`Unavailable`, `Db`).

pub mod event_repo;
pub mod memory_repo;
pub mod sqlite_repo;
