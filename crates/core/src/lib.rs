//! # Weft Core
//!
//! Domain types, collaborator traits, and error definitions for the Weft
//! agent orchestrator. This crate does no I/O of its own: it defines the
//! domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model stream source, tool executor,
//! permission provider) is a trait here. Implementations live in their
//! respective crates, which keeps the orchestrator testable with scripted
//! in-memory stand-ins.

pub mod error;
pub mod message;
pub mod model;
pub mod permission;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ModelError, Result, ToolError};
pub use message::{ConversationEntry, Part, PromptId, Role};
pub use model::{ModelEvent, ModelStream, ModelStreamSource, ToolDefinition, TurnRequest};
pub use permission::{ApprovalMode, PermissionDecision, PermissionProvider};
pub use tool::{Tool, ToolCallDescriptor, ToolExecutor, ToolOutcome, ToolOutput, ToolRegistry, ToolResult};
