//! # Concrete Tools
//!
//! Implementations of [`crate::tools::Tool`] registered with the
//! coordinator's [`crate::tools::ToolRegistry`].

pub mod knowledge_tools;
pub mod search_tools;

pub use knowledge_tools::KnowledgeBaseTool;
pub use search_tools::WebSearchTool;
