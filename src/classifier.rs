//! Interaction classifier
//!
//! Routes each request to the right surface:
//! - Quick query: a single direct-tool unit answers immediately
//! - Full analysis: the complete research/analysis/recommendation workflow

/// Static keyword lists
const ANALYSIS_KEYWORDS: &[&str] = &[
    // Portfolio tasks
    "portfolio", "rebalance", "allocate", "diversify",
    // Analysis tasks
    "analyze", "compare", "assess", "evaluate", "optimize",
    // Action tasks
    "build", "create", "construct", "suggest", "recommend", "generate",
    // Risk work
    "risk", "stress test", "value at risk", "var",
    // Time-based
    "long-term", "short-term", "retirement", "horizon",
];

const QUICK_KEYWORDS: &[&str] = &[
    // Questions
    "what", "how", "explain", "tell me", "what is", "what are",
    // Quick checks
    "price", "quote", "trading at", "current", "today", "now",
    // Simple math
    "compound", "roi", "sharpe", "interest",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionType {
    /// Simple question answered by the quick-query unit.
    QuickQuery,
    /// Multi-step request routed through the full workflow.
    FullAnalysis,
}

pub struct InteractionClassifier;

impl InteractionClassifier {
    pub fn classify(task: &str) -> InteractionType {
        let lowered = task.to_lowercase();

        let analysis_score = ANALYSIS_KEYWORDS
            .iter()
            .filter(|kw| lowered.contains(**kw))
            .count();

        let quick_score = QUICK_KEYWORDS
            .iter()
            .filter(|kw| lowered.contains(**kw))
            .count();

        if analysis_score >= 2 || (analysis_score > 0 && lowered.len() > 60) {
            InteractionType::FullAnalysis
        } else if quick_score >= 1 || analysis_score == 0 {
            InteractionType::QuickQuery
        } else {
            InteractionType::FullAnalysis
        }
    }
}
