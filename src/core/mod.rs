// Core modules implementing staging, engine invocation, output capture, and error modeling.
pub mod engine;
pub mod error;
pub mod invocation;
pub mod staging;
pub mod ui;
