//! Truncation strategies for token-budgeted contexts.
//!
//! A strategy decides which items to drop when a context exceeds its
//! `max_tokens` budget. Strategies are deterministic: ties on timestamp are
//! broken by insertion order, which the item list already encodes.
//!
//! Collaborator-backed strategies (`RelevanceBased`, `Compression`) take
//! their collaborator as part of the variant; without one configured the
//! selector falls back to `OldestFirst`.

use crate::{Context, ContextItem, TruncationKind};
use std::sync::Arc;

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// Scores an item's relevance for relevance-based truncation.
/// Lower scores are dropped first.
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, item: &ContextItem) -> f64;
}

/// Compresses a run of items into a single replacement item.
///
/// Returning `None` signals the summarizer cannot compress the input, in
/// which case truncation falls back to dropping oldest-first.
pub trait Summarizer: Send + Sync {
    fn compress(&self, items: &[ContextItem]) -> Option<ContextItem>;
}

// ============================================================================
// STRATEGY
// ============================================================================

/// Truncation strategy with collaborators resolved.
#[derive(Clone)]
pub enum TruncationStrategy {
    /// Drop `items[0]` until within budget.
    OldestFirst,
    /// Reserve the last four items; keep older system/user items; fill the
    /// remaining budget with older assistant items in order.
    PreserveUser,
    /// Drop lowest-scored items first.
    RelevanceBased(Arc<dyn RelevanceScorer>),
    /// Replace the older half of the transcript with a compressed item.
    Compression(Arc<dyn Summarizer>),
}

impl std::fmt::Debug for TruncationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TruncationStrategy::OldestFirst => write!(f, "OldestFirst"),
            TruncationStrategy::PreserveUser => write!(f, "PreserveUser"),
            TruncationStrategy::RelevanceBased(_) => write!(f, "RelevanceBased(..)"),
            TruncationStrategy::Compression(_) => write!(f, "Compression(..)"),
        }
    }
}

impl TruncationStrategy {
    /// Resolve a wire-level selector against optionally configured
    /// collaborators. Reserved strategies without a collaborator degrade to
    /// `OldestFirst`.
    pub fn resolve(
        kind: TruncationKind,
        scorer: Option<Arc<dyn RelevanceScorer>>,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> Self {
        match kind {
            TruncationKind::OldestFirst => TruncationStrategy::OldestFirst,
            TruncationKind::PreserveUser => TruncationStrategy::PreserveUser,
            TruncationKind::RelevanceBased => match scorer {
                Some(s) => TruncationStrategy::RelevanceBased(s),
                None => TruncationStrategy::OldestFirst,
            },
            TruncationKind::Compression => match summarizer {
                Some(s) => TruncationStrategy::Compression(s),
                None => TruncationStrategy::OldestFirst,
            },
        }
    }
}

// ============================================================================
// APPLICATION
// ============================================================================

/// How a truncation pass resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationOutcome {
    /// The context was already within budget; nothing was dropped.
    Unnecessary,
    /// The selected strategy brought the context within budget on its own.
    Converged,
    /// The strategy left the context over budget and the oldest-first
    /// fallback finished the job.
    FellBack,
}

impl TruncationOutcome {
    /// Metric label for this outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            TruncationOutcome::Unnecessary => "unnecessary",
            TruncationOutcome::Converged => "converged",
            TruncationOutcome::FellBack => "fell_back",
        }
    }
}

/// Apply a truncation strategy to a context.
///
/// No-op when `max_tokens` is zero (unbounded) or the context is already
/// within budget. `current_tokens` is recomputed from the surviving items.
pub fn truncate(ctx: &mut Context, strategy: &TruncationStrategy) -> TruncationOutcome {
    if ctx.max_tokens == 0 || !ctx.over_budget() {
        return TruncationOutcome::Unnecessary;
    }

    let fell_back = match strategy {
        TruncationStrategy::OldestFirst => {
            oldest_first(ctx);
            false
        }
        TruncationStrategy::PreserveUser => preserve_user(ctx),
        TruncationStrategy::RelevanceBased(scorer) => {
            relevance_based(ctx, scorer.as_ref());
            false
        }
        TruncationStrategy::Compression(summarizer) => compression(ctx, summarizer.as_ref()),
    };

    ctx.recount_tokens();
    if fell_back {
        TruncationOutcome::FellBack
    } else {
        TruncationOutcome::Converged
    }
}

/// Drop from the front until within budget or empty.
fn oldest_first(ctx: &mut Context) {
    let mut current = ctx.token_sum();
    let mut dropped = 0usize;
    for item in &ctx.content {
        if current <= ctx.max_tokens {
            break;
        }
        current = current.saturating_sub(item.tokens);
        dropped += 1;
    }
    ctx.content.drain(..dropped);
}

/// Reserve the last four items unconditionally. Among the older items, keep
/// all system/user items, then fill the remaining token budget with assistant
/// items in original order, skipping any that do not fit. Falls back to
/// oldest-first when the result still exceeds the budget; returns whether the
/// fallback ran.
fn preserve_user(ctx: &mut Context) -> bool {
    let reserved_from = ctx.content.len().saturating_sub(4);
    let reserved_tokens: u32 = ctx.content[reserved_from..].iter().map(|i| i.tokens).sum();

    let mut keep = vec![false; reserved_from];
    let mut used = reserved_tokens;

    for (idx, item) in ctx.content[..reserved_from].iter().enumerate() {
        if item.role.is_preserved() {
            keep[idx] = true;
            used = used.saturating_add(item.tokens);
        }
    }

    let mut remaining = ctx.max_tokens.saturating_sub(used);
    for (idx, item) in ctx.content[..reserved_from].iter().enumerate() {
        if keep[idx] || item.role != crate::ItemRole::Assistant {
            continue;
        }
        if item.tokens <= remaining {
            keep[idx] = true;
            remaining -= item.tokens;
        }
    }

    let mut kept = Vec::with_capacity(ctx.content.len());
    for (idx, item) in ctx.content.drain(..).enumerate() {
        if idx >= reserved_from || keep[idx] {
            kept.push(item);
        }
    }
    ctx.content = kept;

    ctx.recount_tokens();
    if ctx.over_budget() {
        oldest_first(ctx);
        return true;
    }
    false
}

/// Drop lowest-scored items first, oldest first among equal scores.
fn relevance_based(ctx: &mut Context, scorer: &dyn RelevanceScorer) {
    let mut order: Vec<usize> = (0..ctx.content.len()).collect();
    let scores: Vec<f64> = ctx.content.iter().map(|i| scorer.score(i)).collect();
    // Stable sort keeps insertion order among equal scores, so the oldest of
    // a tied pair is dropped first.
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal));

    let mut current = ctx.token_sum();
    let mut drop = vec![false; ctx.content.len()];
    for idx in order {
        if current <= ctx.max_tokens {
            break;
        }
        drop[idx] = true;
        current = current.saturating_sub(ctx.content[idx].tokens);
    }

    let mut kept = Vec::with_capacity(ctx.content.len());
    for (idx, item) in ctx.content.drain(..).enumerate() {
        if !drop[idx] {
            kept.push(item);
        }
    }
    ctx.content = kept;
}

/// Replace the older half of the transcript with one compressed item. Falls
/// back to oldest-first when the summarizer declines or the result is still
/// over budget; returns whether the fallback ran.
fn compression(ctx: &mut Context, summarizer: &dyn Summarizer) -> bool {
    let half = ctx.content.len() / 2;
    if half > 0 {
        if let Some(summary) = summarizer.compress(&ctx.content[..half]) {
            let tail: Vec<ContextItem> = ctx.content.split_off(half);
            ctx.content.clear();
            ctx.content.push(summary);
            ctx.content.extend(tail);
        }
    }

    ctx.recount_tokens();
    if ctx.over_budget() {
        oldest_first(ctx);
        return true;
    }
    false
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::ItemRole;
    use proptest::prelude::*;

    fn arb_items() -> impl Strategy<Value = Vec<ContextItem>> {
        prop::collection::vec(
            (0u32..50, 0u8..5).prop_map(|(tokens, role)| {
                let role = match role {
                    0 => ItemRole::System,
                    1 => ItemRole::User,
                    2 => ItemRole::Assistant,
                    3 => ItemRole::ToolResponse,
                    _ => ItemRole::Webhook,
                };
                ContextItem::new(role, "x", tokens)
            }),
            0..30,
        )
    }

    proptest! {
        /// Any strategy leaves `current_tokens` equal to the item sum, and
        /// within budget whenever the budget is non-zero.
        #[test]
        fn prop_truncation_restores_invariants(
            items in arb_items(),
            max_tokens in 1u32..200,
            preserve in any::<bool>(),
        ) {
            let mut ctx = Context::new("a1", "m1").with_max_tokens(max_tokens);
            for item in items {
                ctx.append_item(item);
            }

            let strategy = if preserve {
                TruncationStrategy::PreserveUser
            } else {
                TruncationStrategy::OldestFirst
            };
            truncate(&mut ctx, &strategy);

            prop_assert_eq!(ctx.current_tokens, ctx.token_sum());
            prop_assert!(
                ctx.current_tokens <= max_tokens,
                "{} tokens over budget {}",
                ctx.current_tokens,
                max_tokens
            );
        }

        /// Oldest-first only ever removes a prefix.
        #[test]
        fn prop_oldest_first_keeps_suffix(
            items in arb_items(),
            max_tokens in 1u32..200,
        ) {
            let mut ctx = Context::new("a1", "m1").with_max_tokens(max_tokens);
            for item in items {
                ctx.append_item(item);
            }
            let before = ctx.content.clone();

            truncate(&mut ctx, &TruncationStrategy::OldestFirst);

            let kept = ctx.content.len();
            prop_assert_eq!(&ctx.content[..], &before[before.len() - kept..]);
        }
    }
}
