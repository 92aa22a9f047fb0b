//! The typed datum store (spec §3, §4.1): one server's shard of datum
//! records, with creation, per-subscript storage, retrieval, refcount
//! maintenance, and garbage collection.
//!
//! This crate is deliberately ignorant of subscriptions, dependency rules,
//! and work queues — it reports facts (`StoreOutcome`, `Effects`) for
//! `dflow-server` to act on, the way the original runtime's `data.c` knows
//! nothing about `notifications.c`'s listener tables.

pub mod datum;
pub mod store;
pub mod structs;

pub use datum::{Body, Datum};
pub use store::{DatumStore, Effects, RetrieveOutcome, StoreOutcome};
