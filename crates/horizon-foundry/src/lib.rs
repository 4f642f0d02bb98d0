//! Horizon Foundry - A priority- and deadline-aware task execution engine.
//!
//! This is the main umbrella crate that re-exports all public APIs.
//!
//! # Example
//!
//! ```no_run
//! use horizon_foundry::{Engine, EngineConfig};
//!
//! fn main() {
//!     let engine = Engine::new(EngineConfig::default()).unwrap();
//!
//!     let task = engine
//!         .start(|name: &String| format!("hello, {name}"), "foundry".to_string())
//!         .unwrap();
//!     assert_eq!(task.wait(), Some("hello, foundry".to_string()));
//!
//!     engine.shutdown();
//! }
//! ```
//!
//! # The global engine
//!
//! Applications that want a single well-known engine configure it before
//! `init` and route submissions through the free functions:
//!
//! ```no_run
//! use horizon_foundry::engine;
//!
//! engine::set_pool_size(4);
//! engine::init().unwrap();
//!
//! let task = engine::start(|n: &u32| n + 1, 41).unwrap();
//! assert_eq!(task.wait(), Some(42));
//!
//! engine::destroy();
//! ```

#![warn(missing_docs)]

pub use horizon_foundry_core::*;

pub mod prelude;
