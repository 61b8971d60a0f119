//! Greedy packing of notices into token-bounded batches for the extraction
//! model.

use serde::Serialize;
use tracing::warn;

use crate::segment::{Section, Sections};
use crate::tokenizer::TokenCounter;

pub const DEFAULT_MAX_TOKENS: usize = 2500;
pub const DEFAULT_MAX_SECTION_TOKENS: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_tokens: usize,
    pub max_section_tokens: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self { max_tokens: DEFAULT_MAX_TOKENS, max_section_tokens: DEFAULT_MAX_SECTION_TOKENS }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub sections: Sections,
    pub tokens: usize,
}

impl Batch {
    fn push(&mut self, label: String, section: Section, tokens: usize) {
        self.sections.insert(label, section);
        self.tokens += tokens;
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// A notice too large to send on its own. It is left out of every batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSection {
    pub label: String,
    pub tokens: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
    pub skipped: Vec<SkippedSection>,
}

impl BatchPlan {
    pub fn section_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }
}

/// Size estimate for one notice: its label followed by its mapping form.
pub fn section_tokens(counter: &impl TokenCounter, label: &str, section: &Section) -> usize {
    counter.count_tokens(&format!("{} {}", label, section))
}

/// Pack sections, in order, into batches of at most `limits.max_tokens`.
/// A batch is closed as soon as the next section would overflow it and is
/// never revisited.
pub fn batch_sections(sections: Sections, counter: &impl TokenCounter, limits: BatchLimits) -> BatchPlan {
    let mut plan = BatchPlan::default();
    let mut current = Batch::default();

    for (label, section) in sections {
        let tokens = section_tokens(counter, &label, &section);
        if tokens > limits.max_section_tokens {
            warn!(
                section = %label,
                tokens,
                limit = limits.max_section_tokens,
                "section exceeds the per-section token limit; skipping"
            );
            plan.skipped.push(SkippedSection { label, tokens });
            continue;
        }
        if current.tokens + tokens > limits.max_tokens && !current.is_empty() {
            plan.batches.push(std::mem::take(&mut current));
        }
        current.push(label, section, tokens);
    }

    if !current.is_empty() {
        plan.batches.push(current);
    }
    plan
}
