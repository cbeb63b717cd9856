//! Orrery Server - runs galaxy ticks against an entity store.
//!
//! This crate loads galaxies through the [`EntityStore`] seam, drives the
//! `orrery-core` phases once per wall-clock minute, persists the results
//! with optimistic concurrency and pushes per-faction snapshots to online
//! players.

pub mod actions;
pub mod config;
pub mod events;
pub mod lifecycle;
pub mod push;
pub mod scheduler;
pub mod store;
pub mod tick;

pub use actions::{ActionService, CommandError};
pub use config::ServerConfig;
pub use events::EventBus;
pub use lifecycle::LifecycleError;
pub use push::{ConnectionRegistry, PushError, PushSink};
pub use scheduler::{InFlight, PassResult, Scheduler};
pub use store::{
    Batch, DeferredWrite, DeltaField, EntityRef, EntityStore, InMemoryStore, StoreError,
};
pub use tick::{run_galaxy_tick, SkipReason, TickError, TickKind, TickReport, TickServices};
