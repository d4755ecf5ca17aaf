//! Tiered prompt assembly.
//!
//! Sections are packed into a fixed token budget by tier:
//!
//! 1. **Static** (identity, standing instructions) — never truncated; if the
//!    static tier alone exceeds the budget, assembly fails.
//! 2. **Semi-stable** (summaries, reference material) — packed under an
//!    optional soft cap, head-truncated when it overflows.
//! 3. **Dynamic** (recent task material) — packed newest-first; oldest
//!    sections are evicted first, and a partially fitting section keeps its
//!    newest end.
//!
//! The final block order is stable-sorted by tier and then by mutation
//! frequency, so content that rarely changes always appears in the same
//! position at the front of the prompt and stays cache-friendly across
//! rounds. Assembly is deterministic: identical inputs produce identical
//! output.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::token;

/// Sections below this much available space are dropped rather than
/// truncated to a useless stub.
const MIN_TRUNCATE_TOKENS: usize = 16;

const TRIMMED_PREFIX: &str = "[earlier content trimmed]\n";
const TRUNCATED_SUFFIX: &str = "\n[truncated]";

/// Context tier, ordered from most to least stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Static,
    SemiStable,
    Dynamic,
}

impl Tier {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::SemiStable => "semi_stable",
            Self::Dynamic => "dynamic",
        }
    }
}

/// One titled piece of prompt content.
///
/// `mutation_frequency` orders sections within a tier: lower values change
/// less often and are placed earlier for prefix-cache stability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSection {
    pub tier: Tier,
    pub title: String,
    pub content: String,
    pub mutation_frequency: u32,
}

impl ContextSection {
    pub fn new(
        tier: Tier,
        title: impl Into<String>,
        content: impl Into<String>,
        mutation_frequency: u32,
    ) -> Self {
        Self {
            tier,
            title: title.into(),
            content: content.into(),
            mutation_frequency,
        }
    }

    /// A static section: part of the never-truncated prompt prefix.
    pub fn fixed(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Tier::Static, title, content, 0)
    }

    pub fn semi_stable(
        title: impl Into<String>,
        content: impl Into<String>,
        mutation_frequency: u32,
    ) -> Self {
        Self::new(Tier::SemiStable, title, content, mutation_frequency)
    }

    pub fn dynamic(
        title: impl Into<String>,
        content: impl Into<String>,
        mutation_frequency: u32,
    ) -> Self {
        Self::new(Tier::Dynamic, title, content, mutation_frequency)
    }

    fn header(&self) -> String {
        format!("[{}]\n", self.title)
    }

    fn rendered_tokens(&self) -> usize {
        token::estimate_tokens(&self.header()) + token::estimate_tokens(&self.content)
    }
}

/// A packed block in the final prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBlock {
    pub tier: Tier,
    pub title: String,
    pub content: String,
    mutation_frequency: u32,
}

impl PromptBlock {
    fn tokens(&self) -> usize {
        token::estimate_tokens(&format!("[{}]\n", self.title))
            + token::estimate_tokens(&self.content)
    }
}

/// Per-tier packing statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierStats {
    pub tier: String,
    pub tokens: usize,
    pub sections_included: usize,
    pub sections_total: usize,
}

/// A section dropped or shortened during packing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropInfo {
    pub tier: String,
    pub title: String,
    pub tokens_dropped: usize,
    pub reason: String,
}

/// Metadata about one assembly run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyReport {
    pub total_tokens: usize,
    pub budget: usize,
    pub utilization_pct: f32,
    pub per_tier: Vec<TierStats>,
    pub drops: Vec<DropInfo>,
}

/// The assembled prompt: ordered blocks plus the packing report.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub blocks: Vec<PromptBlock>,
    pub report: AssemblyReport,
}

impl AssembledPrompt {
    /// Render the blocks into one prompt string.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| format!("[{}]\n{}", b.title, b.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, Error)]
pub enum AssemblyError {
    #[error("Static sections ({static_tokens} tokens) exceed the budget ({budget} tokens)")]
    StaticOverflow { static_tokens: usize, budget: usize },
}

/// The prompt assembler. Stateless — create one and reuse it.
pub struct ContextAssembler {
    budget: usize,
    semi_stable_cap: Option<usize>,
}

impl ContextAssembler {
    pub fn new(budget: usize, semi_stable_cap: Option<usize>) -> Self {
        Self {
            budget,
            semi_stable_cap,
        }
    }

    pub fn from_config(config: &taskforge_config::ContextConfig) -> Self {
        Self::new(config.token_budget, config.semi_stable_max_tokens)
    }

    /// Pack sections into the budget. Dynamic sections must be given in
    /// chronological order (oldest first); the output keeps that order
    /// within the dynamic tier.
    pub fn assemble(&self, sections: &[ContextSection]) -> Result<AssembledPrompt, AssemblyError> {
        let mut blocks: Vec<PromptBlock> = Vec::new();
        let mut drops: Vec<DropInfo> = Vec::new();

        let statics: Vec<&ContextSection> =
            sections.iter().filter(|s| s.tier == Tier::Static).collect();
        let semis: Vec<&ContextSection> = sections
            .iter()
            .filter(|s| s.tier == Tier::SemiStable)
            .collect();
        let dynamics: Vec<&ContextSection> = sections
            .iter()
            .filter(|s| s.tier == Tier::Dynamic)
            .collect();

        // Static tier: all or nothing.
        let static_tokens: usize = statics.iter().map(|s| s.rendered_tokens()).sum();
        if static_tokens > self.budget {
            return Err(AssemblyError::StaticOverflow {
                static_tokens,
                budget: self.budget,
            });
        }
        for s in &statics {
            blocks.push(include_whole(s));
        }
        let mut remaining = self.budget - static_tokens;

        // Semi-stable tier: packed in the given order under the soft cap.
        let semi_cap = self
            .semi_stable_cap
            .map_or(remaining, |cap| cap.min(remaining));
        let mut semi_used = 0usize;
        let mut semi_included = 0usize;
        for s in &semis {
            let needed = s.rendered_tokens();
            let space = semi_cap - semi_used;
            if needed <= space {
                blocks.push(include_whole(s));
                semi_used += needed;
                semi_included += 1;
            } else if space >= MIN_TRUNCATE_TOKENS {
                let block = truncate_block(s, space, Keep::Head);
                let actual = block.tokens();
                drops.push(DropInfo {
                    tier: s.tier.name().into(),
                    title: s.title.clone(),
                    tokens_dropped: needed - actual,
                    reason: "Truncated to semi-stable cap".into(),
                });
                blocks.push(block);
                semi_used += actual;
                semi_included += 1;
            } else {
                drops.push(DropInfo {
                    tier: s.tier.name().into(),
                    title: s.title.clone(),
                    tokens_dropped: needed,
                    reason: "Semi-stable cap reached".into(),
                });
            }
        }
        remaining -= semi_used;

        // Dynamic tier: newest wins, oldest evicted. A section that only
        // partly fits keeps the newest end of its content.
        let mut dyn_blocks: Vec<PromptBlock> = Vec::new();
        let mut dyn_used = 0usize;
        for s in dynamics.iter().rev() {
            let needed = s.rendered_tokens();
            let space = remaining - dyn_used;
            if needed <= space {
                dyn_blocks.push(include_whole(s));
                dyn_used += needed;
            } else if space >= MIN_TRUNCATE_TOKENS {
                let block = truncate_block(s, space, Keep::Tail);
                let actual = block.tokens();
                drops.push(DropInfo {
                    tier: s.tier.name().into(),
                    title: s.title.clone(),
                    tokens_dropped: needed - actual,
                    reason: "Oldest content trimmed to fit".into(),
                });
                dyn_blocks.push(block);
                dyn_used += actual;
            } else {
                drops.push(DropInfo {
                    tier: s.tier.name().into(),
                    title: s.title.clone(),
                    tokens_dropped: needed,
                    reason: "Evicted for budget".into(),
                });
            }
        }
        // Restore chronological order.
        dyn_blocks.reverse();
        let dyn_included = dyn_blocks.len();
        blocks.extend(dyn_blocks);

        // Cache-affine ordering: most stable content first, ties keep
        // their relative order.
        blocks.sort_by_key(|b| (b.tier, b.mutation_frequency));

        let total_tokens: usize = blocks.iter().map(|b| b.tokens()).sum();
        let utilization_pct = if self.budget == 0 {
            0.0
        } else {
            (total_tokens as f32 / self.budget as f32) * 100.0
        };
        if !drops.is_empty() {
            debug!(
                dropped = drops.len(),
                total_tokens, budget = self.budget, "Context packing dropped sections"
            );
        }

        let per_tier = vec![
            TierStats {
                tier: Tier::Static.name().into(),
                tokens: static_tokens,
                sections_included: statics.len(),
                sections_total: statics.len(),
            },
            TierStats {
                tier: Tier::SemiStable.name().into(),
                tokens: semi_used,
                sections_included: semi_included,
                sections_total: semis.len(),
            },
            TierStats {
                tier: Tier::Dynamic.name().into(),
                tokens: dyn_used,
                sections_included: dyn_included,
                sections_total: dynamics.len(),
            },
        ];

        Ok(AssembledPrompt {
            blocks,
            report: AssemblyReport {
                total_tokens,
                budget: self.budget,
                utilization_pct,
                per_tier,
                drops,
            },
        })
    }
}

enum Keep {
    Head,
    Tail,
}

fn include_whole(s: &ContextSection) -> PromptBlock {
    PromptBlock {
        tier: s.tier,
        title: s.title.clone(),
        content: s.content.clone(),
        mutation_frequency: s.mutation_frequency,
    }
}

fn truncate_block(s: &ContextSection, allowed_tokens: usize, keep: Keep) -> PromptBlock {
    let header_tokens = token::estimate_tokens(&s.header());
    let marker = match keep {
        Keep::Head => TRUNCATED_SUFFIX,
        Keep::Tail => TRIMMED_PREFIX,
    };
    let content_budget =
        allowed_tokens.saturating_sub(header_tokens + token::estimate_tokens(marker));
    let content = match keep {
        Keep::Head => format!(
            "{}{}",
            token::truncate_head(&s.content, content_budget),
            TRUNCATED_SUFFIX
        ),
        Keep::Tail => format!(
            "{}{}",
            TRIMMED_PREFIX,
            token::truncate_tail(&s.content, content_budget)
        ),
    };
    PromptBlock {
        tier: s.tier,
        title: s.title.clone(),
        content,
        mutation_frequency: s.mutation_frequency,
    }
}
