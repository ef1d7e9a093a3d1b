//! Token usage accounting for one pipeline run.

use serde::{Deserialize, Serialize};

/// Accumulated LLM usage for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Total tokens used
    pub total_tokens: u32,

    /// Prompt/input tokens
    pub prompt_tokens: u32,

    /// Completion/output tokens
    pub completion_tokens: u32,

    /// Number of LLM calls that returned a response
    pub llm_calls: u32,

    /// Estimated cost in USD
    pub estimated_cost: f64,
}

impl LlmUsage {
    /// Add token counts from one provider response.
    pub fn add(&mut self, prompt_tokens: u32, completion_tokens: u32, model: &str) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(completion_tokens);
        self.total_tokens = self
            .total_tokens
            .saturating_add(prompt_tokens.saturating_add(completion_tokens));
        self.llm_calls = self.llm_calls.saturating_add(1);
        self.estimated_cost += Self::estimate_cost(prompt_tokens, completion_tokens, model);
    }

    /// Estimate cost for a usage entry.
    fn estimate_cost(prompt_tokens: u32, completion_tokens: u32, model: &str) -> f64 {
        // Pricing per million tokens
        let (input_rate, output_rate) = match model {
            m if m.contains("llama-3.1-8b") => (0.05, 0.08),
            m if m.contains("llama-3.3-70b") => (0.59, 0.79),
            m if m.contains("gpt-4o-mini") => (0.15, 0.6),
            m if m.contains("gpt-4o") => (2.5, 10.0),
            _ => (0.0, 0.0),
        };

        (prompt_tokens as f64 / 1_000_000.0) * input_rate
            + (completion_tokens as f64 / 1_000_000.0) * output_rate
    }
}
