//! Core systems for Horizon Foundry.
//!
//! This crate provides the foundational components of the Horizon Foundry
//! task execution engine:

#![warn(missing_docs)]
//!
//! - **Engine**: Lifecycle, tunables, and the process-wide instance
//! - **Task API**: Typed task handles with fluent decorators (priority,
//!   delay, interval, release policy, completion callbacks)
//! - **Worker Pool**: Fixed worker threads with single current-task slots
//!   and cooperative cancellation
//! - **Scheduler**: Priority- and deadline-aware dispatch with aging
//! - **Completion Bus**: Per-task completion notifications keyed by
//!   `(context, event)`
//! - **Id Allocation**: Dense, bounded task ids over a bit-vector
//!
//! # Quick Start
//!
//! ```no_run
//! use horizon_foundry_core::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//!
//! // Fire-and-await
//! let task = engine.start(|text: &String| text.to_uppercase(), "hello".to_string()).unwrap();
//! assert_eq!(task.wait(), Some("HELLO".to_string()));
//!
//! engine.shutdown();
//! ```
//!
//! # Priorities and Deadlines
//!
//! Priority 0 is the most urgent; larger values are less urgent. The
//! scheduler ages waiting tasks every tick: a task whose deadline is
//! imminent jumps to priority 0, one far in the future drifts back, and
//! everything in between climbs slowly. Equal priorities run FIFO.
//!
//! ```no_run
//! use std::time::Duration;
//! use horizon_foundry_core::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//!
//! let background = engine
//!     .make_task(|_: &()| expensive_report(), ())
//!     .unwrap()
//!     .with_priority(9)
//!     .with_delay(Duration::from_millis(500));
//! background.run().unwrap();
//!
//! // Submitted later, runs first.
//! let urgent = engine
//!     .make_task(|_: &()| flush_caches(), ())
//!     .unwrap()
//!     .with_priority(0);
//! urgent.run().unwrap();
//! # fn expensive_report() {}
//! # fn flush_caches() {}
//! # engine.shutdown();
//! ```
//!
//! # Periodic Tasks
//!
//! ```no_run
//! use std::time::Duration;
//! use horizon_foundry_core::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//!
//! // Poll a sensor ten times, 100 ms apart; the task keeps its id
//! // across iterations.
//! let poll = engine
//!     .make_task(|_: &()| read_sensor(), ())
//!     .unwrap()
//!     .with_interval(Duration::from_millis(100), 10)
//!     .on_complete(|sample| println!("sample: {sample}"));
//! poll.run().unwrap();
//! # fn read_sensor() -> u32 { 0 }
//! # engine.shutdown();
//! ```

mod bitset;
pub mod bus;
pub mod engine;
mod error;
pub mod ids;
pub mod logging;
mod queue;
mod scheduler;
mod task;
pub mod worker;

pub use bitset::BitSet;
pub use bus::{CompletionBus, Payload, SubscriptionId, completion_event_name};
pub use engine::{Engine, EngineConfig};
pub use error::{EngineError, FatalError, FatalKind, Result};
pub use ids::{IdAllocator, TaskId};
pub use task::{DEFAULT_PRIORITY, ReleasePolicy, Task};
pub use worker::{CancellationToken, cancellation_requested};
