//! Toolmesh Context - Lifecycle Management
//!
//! The context manager: creation, merge/append updates with token accounting
//! and truncation, deletion with cascade, listing, summarization, and
//! in-context search. Every mutation of a context body flows through this
//! crate; the adapter bridge and the API layer never touch the stores
//! directly.

mod manager;
mod summary;

pub use manager::{ContextManager, TruncationRecorder};
pub use summary::{ContextSummarizer, DescriptorSummarizer};
