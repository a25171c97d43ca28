//! Decides whether a tool-free backend reply ends the turn or whether the
//! backend stopped early and should be nudged to keep working.

/// What the loop knows when the backend replies without tool requests.
#[derive(Debug, Clone, Copy)]
pub struct ContinuationContext<'a> {
    pub text: &'a str,
    /// 1-based round that produced `text`.
    pub round: usize,
    /// Tool calls attempted so far this turn (executed or denied).
    pub tools_used: usize,
    /// Continuation instructions already issued this turn.
    pub continuations: usize,
}

pub trait ContinuationPolicy: Send + Sync {
    fn should_continue(&self, ctx: &ContinuationContext<'_>) -> bool;

    /// User-role text appended to the history when continuing.
    fn instruction(&self) -> &str;
}

/// Never continues: the first tool-free reply ends the turn.
pub struct NeverContinue;

impl ContinuationPolicy for NeverContinue {
    fn should_continue(&self, _ctx: &ContinuationContext<'_>) -> bool {
        false
    }

    fn instruction(&self) -> &str {
        ""
    }
}

const DEFAULT_INSTRUCTION: &str = "Continue with the request using the available tools. \
If you already have everything you need, give the final answer now.";

/// Continues only when the turn plausibly stopped halfway: few tools used,
/// still early, no continuation budget spent, and no sign of a finished answer.
#[derive(Debug, Clone)]
pub struct CompletionHeuristic {
    pub min_tools: usize,
    pub max_early_rounds: usize,
    pub max_continuations: usize,
    pub completion_phrases: Vec<String>,
    pub instruction: String,
}

impl Default for CompletionHeuristic {
    fn default() -> Self {
        Self {
            min_tools: 2,
            max_early_rounds: 3,
            max_continuations: 1,
            completion_phrases: [
                "here is",
                "here are",
                "in summary",
                "to summarize",
                "let me know",
                "anything else",
                "i cannot answer",
                "successfully",
                "has been updated",
                "is confirmed",
                "ето",
                "готово",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            instruction: DEFAULT_INSTRUCTION.to_string(),
        }
    }
}

impl CompletionHeuristic {
    fn looks_complete(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.completion_phrases
            .iter()
            .any(|p| lowered.contains(p.as_str()))
    }
}

impl ContinuationPolicy for CompletionHeuristic {
    fn should_continue(&self, ctx: &ContinuationContext<'_>) -> bool {
        ctx.tools_used < self.min_tools
            && ctx.round <= self.max_early_rounds
            && ctx.continuations < self.max_continuations
            && !self.looks_complete(ctx.text)
    }

    fn instruction(&self) -> &str {
        &self.instruction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(text: &str, round: usize, tools_used: usize, continuations: usize) -> ContinuationContext<'_> {
        ContinuationContext {
            text,
            round,
            tools_used,
            continuations,
        }
    }

    #[test]
    fn test_continues_after_early_stop() {
        let h = CompletionHeuristic::default();
        assert!(h.should_continue(&ctx("Let me check the availability first.", 1, 0, 0)));
    }

    #[test]
    fn test_stops_on_completion_phrase() {
        let h = CompletionHeuristic::default();
        assert!(!h.should_continue(&ctx("Here are the free rooms for May.", 1, 0, 0)));
        assert!(!h.should_continue(&ctx("Очаквайте потвърждение. Готово!", 1, 1, 0)));
    }

    #[test]
    fn test_budget_limits() {
        let h = CompletionHeuristic::default();
        let text = "Checking further.";
        assert!(!h.should_continue(&ctx(text, 1, 2, 0)), "enough tools used");
        assert!(!h.should_continue(&ctx(text, 4, 0, 0)), "past early rounds");
        assert!(!h.should_continue(&ctx(text, 1, 0, 1)), "continuation spent");
    }

    #[test]
    fn test_never_continue() {
        assert!(!NeverContinue.should_continue(&ctx("partial", 1, 0, 0)));
    }
}
