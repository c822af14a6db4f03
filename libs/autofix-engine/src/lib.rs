//! Autofix engine: sandbox client, code generator and the repair loop that
//! ties them together.

pub mod classify;
pub mod generator;
pub mod orchestrator;
pub mod prompt;
pub mod sandbox;


pub use generator::{ChatCompletionsGenerator, CodeGenerator, GenerationError};
pub use orchestrator::{CodeFixOrchestrator, LoopRequest};
pub use sandbox::{SandboxExecutionClient, SandboxExecutor};
