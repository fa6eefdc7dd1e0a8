//! kgraph Extractor - Triplet extraction
//!
//! Asks a language model for `(subject, predicate, object)` triplets in a
//! chunk of text, parses whatever shape the model answers in, and enforces
//! the per-chunk cap.

use std::sync::Arc;
use std::time::Duration;

use kgraph_core::{Chunk, ExtractionConfig, KgError, LlmClient, Result, Triplet};

pub mod parse;

pub use parse::{ParseOutcome, ResponseParser};

/// Default triplet extraction prompt
pub const DEFAULT_TRIPLET_PROMPT: &str = include_str!("prompts/kg_triplet.txt");

/// Prompt template with `{max_triplets}` and `{text}` placeholders
#[derive(Debug, Clone)]
pub struct TripletPrompt {
    template: String,
}

impl TripletPrompt {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Render the prompt for one chunk
    pub fn render(&self, text: &str, max_triplets: usize) -> String {
        self.template
            .replace("{max_triplets}", &max_triplets.to_string())
            .replace("{text}", text)
    }
}

impl Default for TripletPrompt {
    fn default() -> Self {
        Self::new(DEFAULT_TRIPLET_PROMPT)
    }
}

/// LLM-backed triplet extractor
pub struct TripletExtractor {
    llm: Arc<dyn LlmClient>,
    config: ExtractionConfig,
    prompt: TripletPrompt,
    parser: ResponseParser,
}

impl TripletExtractor {
    /// Create an extractor with the default prompt
    pub fn new(llm: Arc<dyn LlmClient>, config: ExtractionConfig) -> Self {
        let parser = ResponseParser::new(config.max_entity_chars);
        Self {
            llm,
            config,
            prompt: TripletPrompt::default(),
            parser,
        }
    }

    /// Replace the prompt template
    pub fn with_prompt(mut self, prompt: TripletPrompt) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract with the configured per-chunk cap
    pub async fn extract_chunk(&self, chunk: &Chunk) -> Result<Vec<Triplet>> {
        self.extract(chunk, self.config.max_triplets_per_chunk).await
    }

    /// Extract up to `max_triplets` triplets from a chunk.
    ///
    /// Blank chunks return nothing without calling the model. Retryable
    /// model failures are retried with exponential backoff; the final
    /// failure, or a response with no usable triplet, becomes
    /// [`KgError::Extraction`] carrying the chunk id.
    pub async fn extract(&self, chunk: &Chunk, max_triplets: usize) -> Result<Vec<Triplet>> {
        if chunk.text.trim().is_empty() || max_triplets == 0 {
            return Ok(Vec::new());
        }

        let prompt = self.prompt.render(&chunk.text, max_triplets);
        let response = self.generate_with_retry(chunk, &prompt).await?;

        let outcome = self.parser.parse(&response);
        if outcome.is_unparseable() {
            return Err(KgError::Extraction {
                chunk_id: chunk.id.clone(),
                message: format!(
                    "no usable triplet in model output ({} malformed items)",
                    outcome.malformed
                ),
            });
        }

        if outcome.malformed > 0 {
            tracing::debug!(
                chunk_id = %chunk.id,
                malformed = outcome.malformed,
                "Skipped malformed triplets"
            );
        }

        let parsed = outcome.triplets.len();
        let source = chunk.reference();
        let triplets: Vec<Triplet> = outcome
            .triplets
            .into_iter()
            .take(max_triplets)
            .map(|t| t.with_source(source.clone()))
            .collect();

        tracing::debug!(
            chunk_id = %chunk.id,
            parsed,
            kept = triplets.len(),
            model = self.llm.model_name(),
            "Extracted triplets"
        );

        Ok(triplets)
    }

    async fn generate_with_retry(&self, chunk: &Chunk, prompt: &str) -> Result<String> {
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut attempt = 0u32;

        loop {
            match self.llm.generate(prompt).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        chunk_id = %chunk.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Extraction call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(KgError::Extraction {
                        chunk_id: chunk.id.clone(),
                        message: e.to_string(),
                    })
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kgraph_core::{Document, LlmFailure};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted responses in order, counting calls
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn chunk(text: &str) -> Chunk {
        let doc = Document::new(text);
        Chunk::new(doc.id(), 0, text, 0, text.len())
    }

    fn config() -> ExtractionConfig {
        ExtractionConfig {
            retry_backoff_ms: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_prompt_render() {
        let prompt = TripletPrompt::default().render("Josh called AT&T.", 20);
        assert!(prompt.contains("extract up to 20 knowledge triplets"));
        assert!(prompt.contains("Text: Josh called AT&T.\nTriplets:"));
        assert!(!prompt.contains("{text}"));
    }

    #[tokio::test]
    async fn test_cap_is_enforced() {
        let reply: String = (0..30)
            .map(|i| format!("(Josh, mentions, item {i})\n"))
            .collect();
        let llm = ScriptedLlm::new(vec![Ok(reply)]);
        let extractor = TripletExtractor::new(llm, config());

        let triplets = extractor
            .extract(&chunk("Josh mentions many items."), 20)
            .await
            .unwrap();
        assert_eq!(triplets.len(), 20);
        assert_eq!(triplets[0].object, "item 0");
    }

    #[tokio::test]
    async fn test_triplets_carry_chunk_reference() {
        let c = chunk("Josh wants a Blackberry Torch.");
        let llm = ScriptedLlm::new(vec![Ok("(Josh, wants, Blackberry Torch)".into())]);
        let extractor = TripletExtractor::new(llm, config());

        let triplets = extractor.extract_chunk(&c).await.unwrap();
        assert_eq!(triplets.len(), 1);
        assert_eq!(triplets[0].source.as_ref().unwrap().chunk_id, c.id);
    }

    #[tokio::test]
    async fn test_blank_chunk_skips_model() {
        let llm = ScriptedLlm::new(vec![]);
        let extractor = TripletExtractor::new(llm.clone(), config());

        assert!(extractor.extract(&chunk("   "), 20).await.unwrap().is_empty());
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried() {
        let llm = ScriptedLlm::new(vec![
            Err(KgError::llm(LlmFailure::Timeout, "slow")),
            Ok("(Erica, works for, AT&T)".into()),
        ]);
        let extractor = TripletExtractor::new(llm.clone(), config());

        let triplets = extractor.extract(&chunk("Erica works for AT&T."), 20).await.unwrap();
        assert_eq!(triplets.len(), 1);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_carry_chunk_id() {
        let llm = ScriptedLlm::new(vec![
            Err(KgError::llm(LlmFailure::Timeout, "slow")),
            Err(KgError::llm(LlmFailure::Timeout, "slow")),
            Err(KgError::llm(LlmFailure::Timeout, "slow")),
        ]);
        let extractor = TripletExtractor::new(llm.clone(), config());
        let c = chunk("Erica works for AT&T.");

        let err = extractor.extract(&c, 20).await.unwrap_err();
        match err {
            KgError::Extraction { chunk_id, .. } => assert_eq!(chunk_id, c.id),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let llm = ScriptedLlm::new(vec![Err(KgError::llm(LlmFailure::Unauthorized, "401"))]);
        let extractor = TripletExtractor::new(llm.clone(), config());

        let err = extractor.extract(&chunk("text"), 20).await.unwrap_err();
        assert!(matches!(err, KgError::Extraction { .. }));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_output_is_an_extraction_error() {
        let llm = ScriptedLlm::new(vec![Ok("Sorry, I cannot help with that.".into())]);
        let extractor = TripletExtractor::new(llm, config());

        let err = extractor.extract(&chunk("text"), 20).await.unwrap_err();
        assert!(matches!(err, KgError::Extraction { .. }));
    }
}
