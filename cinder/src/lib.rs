//! Ahead-of-time compiler for a microcontroller-hosted managed execution
//! engine. Given a program in stack-based CLI bytecode and a designated entry
//! method, the pipeline walks everything actually reachable, renumbers every
//! metadata reference into a flat token space, patches the bytecode, lays out
//! classes, orders static initializers and streams the finished image to the
//! device in dependency order.

pub mod compiler;
pub mod dispatch;
pub mod errors;
pub mod il;
pub mod layout;
pub mod program;
pub mod replacement;
pub mod rewriter;
pub mod sequencer;
pub mod set;
pub mod settings;
pub mod synth;
pub mod tasks;
pub mod tokens;
pub mod upload;
pub mod walker;
mod utilities;

pub use compiler::Compiler;
pub use errors::{CompileError, DeviceError};
pub use set::{ExecutionSet, Snapshot};
pub use settings::CompileSettings;
pub use tokens::{ImageToken, ImageTokenKind};
