//! The resona execution engine: job admission and dispatch, the bounded
//! worker pool, and progress distribution.
//!
//! Structure mirrors the component model of the service:
//!
//! - [`Scheduler`] - admission control, priority dispatch, cancellation,
//!   restart recovery, and the worker pool itself.
//! - [`ProgressBus`] - single integration point for progress propagation:
//!   writes the [`ProgressCache`] and pushes to the [`SubscriptionRegistry`].
//! - [`MemoryJobStore`] - in-memory [`resona_core::JobStore`] for
//!   brokerless deployments and tests.

pub mod bus;
pub mod cache;
pub mod config;
pub mod memory;
pub mod registry;
pub mod scheduler;
mod worker;

pub use bus::ProgressBus;
pub use cache::ProgressCache;
pub use config::EngineConfig;
pub use memory::MemoryJobStore;
pub use registry::{SubscriberId, SubscriptionRegistry};
pub use scheduler::{CancelOutcome, EnqueueRequest, QueueStatus, Scheduler};
