//! Purpose: Define the public Rust API boundary for tfapi.
//! Exports: Wire types, the request pipeline, and the core types callers need.
//! Role: Single import path for the binary, the HTTP layer, and integration tests.
//! Invariants: Additive-only surface; internal helpers stay in their modules.

mod message;
mod runner;

pub use crate::core::engine::{CommandEngine, Engine};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::invocation::{Invocation, Operation};
pub use crate::core::staging::{CONFIG_FILE, PLAN_FILE, STATE_FILE, StageContents, StagedFiles};
pub use crate::core::ui::{BufferUi, Ui};
pub use message::{Request, Response};
pub use runner::Runner;
