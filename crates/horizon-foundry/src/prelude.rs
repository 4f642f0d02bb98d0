//! Prelude module for Horizon Foundry.
//!
//! This module re-exports the most commonly used types for convenient
//! importing:
//!
//! ```ignore
//! use horizon_foundry::prelude::*;
//! ```

// ============================================================================
// Engine Lifecycle
// ============================================================================

pub use crate::engine::{self, Engine, EngineConfig};

// ============================================================================
// Task API
// ============================================================================

pub use crate::{ReleasePolicy, Task, TaskId};

// ============================================================================
// Cancellation
// ============================================================================

pub use crate::{CancellationToken, cancellation_requested};

// ============================================================================
// Errors
// ============================================================================

pub use crate::{EngineError, FatalError, FatalKind, Result};
