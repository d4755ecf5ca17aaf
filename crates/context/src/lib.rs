//! # Taskforge Context
//!
//! Tiered prompt assembly under a fixed token budget. Callers describe
//! their prompt as titled sections in three stability tiers; the assembler
//! packs them deterministically so the stable prefix survives truncation
//! and stays aligned for provider prompt caching.

pub mod assembler;
pub mod token;

pub use assembler::{
    AssembledPrompt, AssemblyError, AssemblyReport, ContextAssembler, ContextSection, DropInfo,
    PromptBlock, Tier, TierStats,
};
pub use token::estimate_tokens;
