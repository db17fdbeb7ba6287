//! Event store services.
//!
//! # Responsibility
//! - Coordinate normalizer, cache, adapter, queue and notifier into the
//!   public add/update/delete/get/list surface.
//! - Keep outer layers (CLI, bindings) decoupled from storage details.

pub mod event_store;
pub mod guard;
pub mod response;
