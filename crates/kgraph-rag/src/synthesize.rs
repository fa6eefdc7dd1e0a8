//! Response synthesis
//!
//! Turns retrieved context fragments into an answer. Every prompt stays
//! within `max_prompt_chars` regardless of how much context was retrieved.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use kgraph_core::{KgError, LlmClient, QueryConfig, ResponseMode, Result};

const ANSWER_TEMPLATE: &str = include_str!("prompts/answer.txt");
const SUMMARIZE_TEMPLATE: &str = include_str!("prompts/summarize.txt");
const REFINE_TEMPLATE: &str = include_str!("prompts/refine.txt");

/// Context budget floor when the prompt limit is very small
const MIN_CONTEXT_CHARS: usize = 200;

/// Synthesizes answers with the configured [`ResponseMode`]
pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
    mode: ResponseMode,
    max_prompt_chars: usize,
    concurrency: usize,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, config: &QueryConfig) -> Self {
        Self {
            llm,
            mode: config.response_mode,
            max_prompt_chars: config.max_prompt_chars,
            concurrency: config.summary_concurrency.max(1),
        }
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    /// Characters left for context once the template and question are counted
    fn context_budget(&self, template: &str, question: &str, reserved: usize) -> usize {
        let overhead = template.chars().count() + question.chars().count() + reserved;
        self.max_prompt_chars
            .saturating_sub(overhead)
            .max(MIN_CONTEXT_CHARS)
    }

    /// Answer `question` from context fragments (one fact or passage each)
    pub async fn synthesize(&self, question: &str, fragments: &[String]) -> Result<String> {
        if fragments.is_empty() {
            return Ok(String::new());
        }

        match self.mode {
            ResponseMode::NoText => Ok(fragments.join("\n")),
            ResponseMode::SimpleSummarize => {
                let budget = self.context_budget(ANSWER_TEMPLATE, question, 0);
                let joined = fragments.join("\n");
                let context = truncate_chars(&joined, budget);
                self.answer(ANSWER_TEMPLATE, question, context).await
            }
            ResponseMode::Refine => self.refine(question, fragments).await,
            ResponseMode::TreeSummarize => self.tree_summarize(question, fragments).await,
        }
    }

    async fn tree_summarize(&self, question: &str, fragments: &[String]) -> Result<String> {
        let budget = self.context_budget(SUMMARIZE_TEMPLATE, question, 0);
        let mut groups = pack(fragments, budget);
        let mut level = 0usize;

        while groups.len() > 1 {
            tracing::debug!(level, partitions = groups.len(), "Summarizing partitions");

            let summaries: Vec<String> = stream::iter(groups.iter())
                .map(|group| self.answer(SUMMARIZE_TEMPLATE, question, group))
                .buffered(self.concurrency)
                .try_collect()
                .await?;

            let k = summaries.len();
            let mut next = pack(&summaries, budget);
            if next.len() >= k {
                // Summaries too long to merge: halve them so pairs fit
                let half = budget.saturating_sub(1) / 2;
                let shrunk: Vec<String> = summaries
                    .iter()
                    .map(|s| truncate_chars(s, half).to_string())
                    .collect();
                next = pack(&shrunk, budget);
            }

            groups = next;
            level += 1;
        }

        match groups.first() {
            Some(context) => self.answer(SUMMARIZE_TEMPLATE, question, context).await,
            None => Err(KgError::Query("no context left to summarize".to_string())),
        }
    }

    async fn refine(&self, question: &str, fragments: &[String]) -> Result<String> {
        let budget = self.context_budget(ANSWER_TEMPLATE, question, 0);
        let groups = pack(fragments, budget);
        let Some((first, rest)) = groups.split_first() else {
            return Err(KgError::Query("no context left to refine".to_string()));
        };

        let mut answer = self.answer(ANSWER_TEMPLATE, question, first).await?;
        for group in rest {
            let existing = truncate_chars(&answer, budget / 2).to_string();
            let refine_budget =
                self.context_budget(REFINE_TEMPLATE, question, existing.chars().count());
            let context = truncate_chars(group, refine_budget);

            let prompt = REFINE_TEMPLATE
                .replace("{query}", question)
                .replace("{existing_answer}", &existing)
                .replace("{context}", context);
            answer = self.generate(&prompt).await?;
        }

        Ok(answer)
    }

    async fn answer(&self, template: &str, question: &str, context: &str) -> Result<String> {
        let prompt = template
            .replace("{context}", context)
            .replace("{query}", question);
        self.generate(&prompt).await
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let text = self
            .llm
            .generate(prompt)
            .await
            .map_err(|e| KgError::Query(format!("answer synthesis failed: {e}")))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(KgError::Query("model returned an empty answer".to_string()));
        }
        Ok(text.to_string())
    }
}

/// Greedily pack fragments into newline-joined groups of at most `budget`
/// characters. A fragment longer than the budget is truncated.
pub fn pack(fragments: &[String], budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for fragment in fragments {
        let fragment = truncate_chars(fragment, budget);
        let chars = fragment.chars().count();

        if current_chars > 0 && current_chars + 1 + chars > budget {
            groups.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if current_chars > 0 {
            current.push('\n');
            current_chars += 1;
        }
        current.push_str(fragment);
        current_chars += chars;
    }

    if current_chars > 0 {
        groups.push(current);
    }
    groups
}

/// Longest prefix of at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kgraph_core::LlmFailure;
    use std::sync::Mutex;

    /// Records prompts; answers with a fixed reply or the call number
    struct RecordingLlm {
        prompts: Mutex<Vec<String>>,
        reply: Option<String>,
        fail: bool,
    }

    impl RecordingLlm {
        fn numbered() -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
                reply: None,
                fail: false,
            })
        }

        fn fixed(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
                reply: Some(reply.to_string()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
                reply: None,
                fail: true,
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for RecordingLlm {
        async fn generate(&self, prompt: &str) -> Result<String> {
            if self.fail {
                return Err(KgError::llm(LlmFailure::Unavailable, "down"));
            }
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            Ok(match &self.reply {
                Some(reply) => reply.clone(),
                None => format!("summary {}", prompts.len()),
            })
        }

        fn model_name(&self) -> &str {
            "recording"
        }
    }

    fn config(mode: ResponseMode, max_prompt_chars: usize) -> QueryConfig {
        QueryConfig {
            response_mode: mode,
            max_prompt_chars,
            summary_concurrency: 2,
            ..Default::default()
        }
    }

    fn fragments(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("(Josh Milligan, mentioned, detail number {i:03})"))
            .collect()
    }

    #[test]
    fn test_pack_respects_budget() {
        let groups = pack(&fragments(10), 100);
        assert!(groups.len() > 1);
        assert!(groups.iter().all(|g| g.chars().count() <= 100));
        assert_eq!(groups.join("\n"), fragments(10).join("\n"));
    }

    #[test]
    fn test_pack_truncates_oversized_fragment() {
        let groups = pack(&["é".repeat(30)], 10);
        assert_eq!(groups, vec!["é".repeat(10)]);
    }

    #[tokio::test]
    async fn test_tree_summarize_single_partition() {
        let llm = RecordingLlm::numbered();
        let synth = Synthesizer::new(llm.clone(), &config(ResponseMode::TreeSummarize, 4000));

        let answer = synth.synthesize("Who?", &fragments(3)).await.unwrap();
        assert_eq!(answer, "summary 1");
        assert_eq!(llm.prompts().len(), 1);
        assert!(llm.prompts()[0].contains("detail number 002"));
    }

    #[tokio::test]
    async fn test_tree_summarize_reduces_partitions() {
        let llm = RecordingLlm::numbered();
        let synth = Synthesizer::new(llm.clone(), &config(ResponseMode::TreeSummarize, 600));

        let answer = synth
            .synthesize("Summarize the key points", &fragments(40))
            .await
            .unwrap();

        let prompts = llm.prompts();
        assert!(prompts.len() >= 3);
        assert_eq!(answer, format!("summary {}", prompts.len()));
        assert!(prompts.iter().all(|p| p.chars().count() <= 600));
    }

    #[tokio::test]
    async fn test_tree_summarize_terminates_with_long_summaries() {
        let llm = RecordingLlm::fixed(&"very long summary ".repeat(40));
        let synth = Synthesizer::new(llm.clone(), &config(ResponseMode::TreeSummarize, 600));

        let answer = synth.synthesize("Summarize", &fragments(40)).await.unwrap();
        assert!(answer.starts_with("very long summary"));
        assert!(llm.prompts().iter().all(|p| p.chars().count() <= 600));
    }

    #[tokio::test]
    async fn test_simple_summarize_single_call() {
        let llm = RecordingLlm::numbered();
        let synth = Synthesizer::new(llm.clone(), &config(ResponseMode::SimpleSummarize, 600));

        synth.synthesize("Who?", &fragments(40)).await.unwrap();
        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].chars().count() <= 600);
    }

    #[tokio::test]
    async fn test_refine_carries_existing_answer() {
        let llm = RecordingLlm::numbered();
        let synth = Synthesizer::new(llm.clone(), &config(ResponseMode::Refine, 600));

        let answer = synth.synthesize("Who?", &fragments(40)).await.unwrap();
        let prompts = llm.prompts();
        assert!(prompts.len() > 1);
        assert!(prompts[1].contains("existing answer: summary 1"));
        assert_eq!(answer, format!("summary {}", prompts.len()));
    }

    #[tokio::test]
    async fn test_no_text_skips_model() {
        let llm = RecordingLlm::numbered();
        let synth = Synthesizer::new(llm.clone(), &config(ResponseMode::NoText, 600));

        let answer = synth.synthesize("Who?", &fragments(2)).await.unwrap();
        assert_eq!(answer, fragments(2).join("\n"));
        assert!(llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_model_failure_is_query_error() {
        let synth = Synthesizer::new(
            RecordingLlm::failing(),
            &config(ResponseMode::TreeSummarize, 4000),
        );
        let err = synth.synthesize("Who?", &fragments(2)).await.unwrap_err();
        assert!(matches!(err, KgError::Query(_)));
    }

    #[tokio::test]
    async fn test_blank_model_reply_is_query_error() {
        for mode in [
            ResponseMode::TreeSummarize,
            ResponseMode::SimpleSummarize,
            ResponseMode::Refine,
        ] {
            let synth = Synthesizer::new(RecordingLlm::fixed("   \n"), &config(mode, 4000));
            let err = synth.synthesize("Summarize", &fragments(1)).await.unwrap_err();
            assert!(matches!(err, KgError::Query(_)), "{mode:?}");
        }
    }

    #[tokio::test]
    async fn test_blank_fragments_are_query_error() {
        let llm = RecordingLlm::numbered();
        let synth = Synthesizer::new(llm.clone(), &config(ResponseMode::TreeSummarize, 4000));

        let err = synth
            .synthesize("Summarize", &[String::new()])
            .await
            .unwrap_err();
        assert!(matches!(err, KgError::Query(_)));
        assert!(llm.prompts().is_empty());
    }
}
