//! Execution machinery
//!
//! This module provides:
//! - [`WorkerPool`] - Bounded concurrent execution with an unbounded wait queue
//! - [`HeartbeatSender`] / [`HeartbeatSession`] - Lease refresh for an in-flight attempt
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │     Wait queue (Semaphore, FIFO, unbounded)          │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │         Execution slots (max_workers)               │    │
//! │  │  [Work 1] [Work 2] ... [Work N]                     │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │         ▲                                                    │
//! │         │ refreshes attempt lease every heartbeat_period     │
//! │  ┌──────┴──────────┐                                         │
//! │  │ HeartbeatSender │  (one per in-flight attempt)            │
//! │  └─────────────────┘                                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod heartbeat;
mod pool;

pub use heartbeat::{HeartbeatExit, HeartbeatSender, HeartbeatSession};
pub use pool::{PoolError, WorkHandle, WorkerPool, WorkerPoolStatus};
