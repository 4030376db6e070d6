//! Context summarization contract.
//!
//! The built-in summarizer returns a deterministic descriptor; a real
//! summarizer (LLM-backed or otherwise) can be substituted without touching
//! the manager. The contract is a string which may be empty on error.

use async_trait::async_trait;
use toolmesh_core::Context;

/// Produces a human-readable summary of a context.
#[async_trait]
pub trait ContextSummarizer: Send + Sync {
    async fn summarize(&self, ctx: &Context) -> String;
}

/// Deterministic descriptor summarizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorSummarizer;

#[async_trait]
impl ContextSummarizer for DescriptorSummarizer {
    async fn summarize(&self, ctx: &Context) -> String {
        format!(
            "Context with {} messages and {} tokens",
            ctx.content.len(),
            ctx.current_tokens
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolmesh_core::{ContextItem, ItemRole};

    #[tokio::test]
    async fn test_descriptor_is_deterministic() {
        let mut ctx = Context::new("a1", "m1");
        ctx.append_item(ContextItem::new(ItemRole::User, "hi", 3));
        ctx.append_item(ContextItem::new(ItemRole::Assistant, "hello", 4));

        let summarizer = DescriptorSummarizer;
        assert_eq!(
            summarizer.summarize(&ctx).await,
            "Context with 2 messages and 7 tokens"
        );
        assert_eq!(
            summarizer.summarize(&ctx).await,
            "Context with 2 messages and 7 tokens"
        );
    }
}
