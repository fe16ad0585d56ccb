//! Per-agent event bus for an AI-agent orchestration backend.
//!
//! Each running agent gets an append-only, sequence-numbered event log with
//! live fan-out to any number of subscribers. A subscriber can attach at
//! any sequence and gets buffered replay followed by live continuation; a
//! background scheduler evicts subscribers that stop reading.

pub mod api;
pub mod config;
pub mod event_bus;
pub mod models;
pub mod repository;
pub mod service;
pub mod tasks;

pub use event_bus::{BusError, EventBroadcaster, EventBuffer, Subscription};
pub use models::{AgentEvent, EventPayload};
pub use repository::{
    BroadcastRepository, EventStream, MemoryBroadcastRepository, MemoryStreamRepository,
    StreamRepository,
};
pub use service::EventBusService;
pub use tasks::CleanupScheduler;
