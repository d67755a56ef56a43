//! # Lease Engine
//!
//! An in-process engine that runs asynchronous units of work under time-bounded leases.
//!
//! ## Features
//!
//! - **Leases and heartbeats**: every running attempt refreshes its lease while its work is
//!   in flight
//! - **Automatic resubmission**: an attempt that stays silent past its lease is replaced by a
//!   fresh attempt for the same task
//! - **Bounded concurrency**: at most `max_workers` units of work execute at once; the rest
//!   wait in FIFO order
//! - **Reaping**: finished tasks and their attempts are removed on the next monitor pass
//!
//! Execution is at-least-once. A stalled attempt is never interrupted, so a task may run
//! more than once concurrently after resubmission. State lives only for the life of the
//! process.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │  (submit, status, set_status, shutdown)                      │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                      ▲
//!          ▼                    ▼                      │ scans
//! ┌──────────────────┐  ┌──────────────────┐  ┌────────┴─────────┐
//! │   TaskRegistry   │  │  AttemptRegistry │  │   LeaseMonitor   │
//! │ (status, result) │  │ (last heartbeat) │  │ (resubmit, reap) │
//! └──────────────────┘  └──────────────────┘  └──────────────────┘
//!          ▲                    ▲
//!          │                    │ refreshes
//! ┌─────────────────────────────────────────────────────────────┐
//! │          WorkerPool  +  one HeartbeatSender per attempt      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use leasekeep_engine::prelude::*;
//! use serde_json::json;
//!
//! let engine = Engine::new(EngineConfig::default())?;
//!
//! let add = Work::new(|ctx: WorkContext| async move {
//!     tokio::time::sleep(std::time::Duration::from_secs(2)).await;
//!     Ok::<_, WorkError>(json!(ctx.arg::<i64>("x")? + ctx.arg::<i64>("y")?))
//! });
//!
//! let mut args = Arguments::new();
//! args.insert("x".into(), json!(2));
//! args.insert("y".into(), json!(3));
//! engine.submit(add, "req-1", args)?;
//!
//! // later
//! let view = engine.status("req-1")?;
//! assert_eq!(view.result, Some(json!(5)));
//! ```

pub mod config;
pub mod engine;
pub mod monitor;
pub mod registry;
pub mod work;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, EngineConfig};
    pub use crate::engine::{AttemptView, Engine, EngineError, TaskView};
    pub use crate::monitor::{Resubmission, ScanReport};
    pub use crate::registry::{RegistryError, TaskStatus};
    pub use crate::work::{Arguments, Work, WorkContext, WorkError, WorkErrorKind, WorkResult};
}

// Re-export key types at crate root
pub use config::{ConfigError, EngineConfig};
pub use engine::{AttemptView, Engine, EngineError, TaskView};
pub use monitor::{Resubmission, ScanReport};
pub use registry::{Attempt, AttemptRegistry, RegistryError, Task, TaskRegistry, TaskStatus};
pub use work::{Arguments, Work, WorkContext, WorkError, WorkErrorKind, WorkResult};
pub use worker::{HeartbeatExit, HeartbeatSender, HeartbeatSession, PoolError, WorkerPool};
