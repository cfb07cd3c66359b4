//! Model stream sources for Weft.
//!
//! All sources implement the `weft_core::ModelStreamSource` trait.

pub mod openai_compat;
pub mod scripted;

pub use openai_compat::OpenAiCompatSource;
pub use scripted::ScriptedSource;
