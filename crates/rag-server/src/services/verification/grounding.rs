use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{Citation, ScoredChunk, VerificationResult};
use crate::services::llm_service::{ChatCompleter, CompletionRequest};

const GROUNDING_SYSTEM_PROMPT: &str = "You verify whether an answer is grounded in the provided \
source chunks. Respond with JSON only, in exactly this shape: \
{\"grounding_score\": <0..1>, \"is_grounded\": <bool>, \"supported_claims\": [\"...\"], \
\"unsupported_claims\": [\"...\"], \"citations\": [{\"chunk_index\": <int>, \"quote\": \"...\", \
\"relevance_score\": <0..1>}]}";

#[derive(Debug, Deserialize)]
struct GroundingReport {
    grounding_score: f32,
    #[serde(default)]
    is_grounded: bool,
    #[serde(default)]
    supported_claims: Vec<String>,
    #[serde(default)]
    unsupported_claims: Vec<String>,
    #[serde(default)]
    citations: Vec<ReportCitation>,
}

#[derive(Debug, Deserialize)]
struct ReportCitation {
    chunk_index: i64,
    #[serde(default)]
    quote: String,
    #[serde(default)]
    relevance_score: f32,
}

/// Checks an answer against its source chunks via a JSON-only LLM prompt.
/// The request runs with twice the standard gateway timeout.
pub struct GroundingVerifier {
    completer: Arc<dyn ChatCompleter>,
    grounding_threshold: f32,
    llm_timeout: Duration,
}

impl GroundingVerifier {
    pub fn new(
        completer: Arc<dyn ChatCompleter>,
        grounding_threshold: f32,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            completer,
            grounding_threshold,
            llm_timeout,
        }
    }

    fn build_prompt(question: &str, answer: &str, chunks: &[ScoredChunk]) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "Question:\n{}\n", question);
        let _ = writeln!(prompt, "Answer to verify:\n{}\n", answer);
        prompt.push_str("Source chunks:\n");
        for (i, chunk) in chunks.iter().enumerate() {
            let _ = writeln!(
                prompt,
                "[{}] ({})\n{}\n",
                i, chunk.result.filename, chunk.result.content
            );
        }
        prompt.push_str(
            "\nCheck every factual claim in the answer against the chunks and reply with the JSON verdict.",
        );
        prompt
    }

    fn parse_report(content: &str) -> Option<GroundingReport> {
        let trimmed = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        serde_json::from_str(trimmed).ok()
    }

    /// Citations referencing a valid chunk index are enriched with the
    /// chunk's id and filename; out-of-range ones are dropped.
    fn resolve_citations(citations: Vec<ReportCitation>, chunks: &[ScoredChunk]) -> Vec<Citation> {
        citations
            .into_iter()
            .filter_map(|citation| {
                let index = usize::try_from(citation.chunk_index).ok()?;
                let chunk = chunks.get(index)?;
                Some(Citation {
                    chunk_index: index,
                    quote: citation.quote,
                    relevance_score: citation.relevance_score.clamp(0.0, 1.0),
                    chunk_id: Some(chunk.result.chunk_id),
                    filename: Some(chunk.result.filename.clone()),
                })
            })
            .collect()
    }

    pub async fn verify(
        &self,
        question: &str,
        answer: &str,
        chunks: &[ScoredChunk],
    ) -> VerificationResult {
        if chunks.is_empty() {
            return VerificationResult {
                grounding_score: 0.0,
                is_grounded: false,
                supported_claims: Vec::new(),
                unsupported_claims: vec!["No supporting chunks retrieved".to_string()],
                citations: Vec::new(),
            };
        }

        let request = CompletionRequest::new(Self::build_prompt(question, answer, chunks))
            .with_system(GROUNDING_SYSTEM_PROMPT)
            .with_sampling(0.1, 1000)
            .with_timeout(self.llm_timeout * 2);

        let content = match self.completer.complete(request).await {
            Ok(completion) => completion.content,
            Err(err) => {
                warn!("Grounding verification failed: {}", err);
                return VerificationResult::unverifiable();
            }
        };

        let Some(report) = Self::parse_report(&content) else {
            warn!("Grounding reply unparseable");
            return VerificationResult::unverifiable();
        };

        let grounding_score = report.grounding_score.clamp(0.0, 1.0);
        // The model's own verdict cannot overrule the threshold
        let is_grounded = report.is_grounded && grounding_score >= self.grounding_threshold;

        debug!(
            "Grounding verdict: score={:.2} grounded={}",
            grounding_score, is_grounded
        );

        VerificationResult {
            grounding_score,
            is_grounded,
            supported_claims: report.supported_claims,
            unsupported_claims: report.unsupported_claims,
            citations: Self::resolve_citations(report.citations, chunks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ChunkMetadata;
    use crate::models::{SearchResult, Usage};
    use crate::services::llm_service::Completion;
    use crate::utils::error::AppError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use uuid::Uuid;

    fn chunk(content: &str) -> ScoredChunk {
        ScoredChunk {
            result: SearchResult {
                chunk_id: Uuid::new_v4(),
                document_id: Uuid::new_v4(),
                content: content.to_string(),
                score: 0.8,
                chunk_index: 0,
                filename: "rag.md".to_string(),
                filepath: "/docs/rag.md".to_string(),
                file_type: "md".to_string(),
                document_summary: None,
                metadata: ChunkMetadata::default(),
            },
            relevance_score: 0.8,
            explanation: None,
        }
    }

    struct StubCompleter {
        reply: String,
        last_request: Mutex<Option<CompletionRequest>>,
        fail: bool,
    }

    impl StubCompleter {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                last_request: Mutex::new(None),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl ChatCompleter for StubCompleter {
        async fn complete(&self, request: CompletionRequest) -> Result<Completion, AppError> {
            *self.last_request.lock() = Some(request);
            if self.fail {
                return Err(AppError::Timeout("slow".to_string()));
            }
            Ok(Completion {
                content: self.reply.clone(),
                model: "stub".to_string(),
                usage: Usage::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_grounded_answer() {
        let reply = r#"{
            "grounding_score": 0.9,
            "is_grounded": true,
            "supported_claims": ["RAG combines retrieval with generation"],
            "unsupported_claims": [],
            "citations": [{"chunk_index": 0, "quote": "RAG combines retrieval", "relevance_score": 0.95}]
        }"#;
        let stub = Arc::new(StubCompleter::new(reply));
        let verifier = GroundingVerifier::new(stub.clone(), 0.7, Duration::from_secs(30));

        let chunks = vec![chunk("RAG combines retrieval with generation.")];
        let result = verifier.verify("What is RAG?", "RAG combines both.", &chunks).await;

        assert!(result.is_grounded);
        assert!((result.grounding_score - 0.9).abs() < f32::EPSILON);
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].chunk_id, Some(chunks[0].result.chunk_id));
        assert_eq!(result.citations[0].filename.as_deref(), Some("rag.md"));

        // The verifier runs with a doubled timeout
        let request = stub.last_request.lock().clone().unwrap();
        assert_eq!(request.timeout_override, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_threshold_forces_ungrounded() {
        let reply = r#"{"grounding_score": 0.5, "is_grounded": true,
            "supported_claims": [], "unsupported_claims": [], "citations": []}"#;
        let verifier = GroundingVerifier::new(
            Arc::new(StubCompleter::new(reply)),
            0.7,
            Duration::from_secs(30),
        );

        let result = verifier.verify("q", "a", &[chunk("text")]).await;
        assert!(!result.is_grounded);
    }

    #[tokio::test]
    async fn test_out_of_range_citation_dropped() {
        let reply = r#"{"grounding_score": 0.8, "is_grounded": true,
            "supported_claims": [], "unsupported_claims": [],
            "citations": [
                {"chunk_index": 5, "quote": "phantom", "relevance_score": 0.9},
                {"chunk_index": 0, "quote": "real", "relevance_score": 0.9}
            ]}"#;
        let verifier = GroundingVerifier::new(
            Arc::new(StubCompleter::new(reply)),
            0.7,
            Duration::from_secs(30),
        );

        let result = verifier.verify("q", "a", &[chunk("text")]).await;
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].quote, "real");
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_conservative() {
        let verifier = GroundingVerifier::new(
            Arc::new(StubCompleter::new("I think it looks fine!")),
            0.7,
            Duration::from_secs(30),
        );

        let result = verifier.verify("q", "a", &[chunk("text")]).await;
        assert!(!result.is_grounded);
        assert!((result.grounding_score - 0.5).abs() < f32::EPSILON);
        assert_eq!(result.unsupported_claims, vec!["Verification failed".to_string()]);
    }

    #[tokio::test]
    async fn test_llm_failure_is_conservative() {
        let mut stub = StubCompleter::new("");
        stub.fail = true;
        let verifier = GroundingVerifier::new(Arc::new(stub), 0.7, Duration::from_secs(30));

        let result = verifier.verify("q", "a", &[chunk("text")]).await;
        assert!(!result.is_grounded);
        assert_eq!(result.unsupported_claims, vec!["Verification failed".to_string()]);
    }

    #[tokio::test]
    async fn test_no_chunks_not_grounded() {
        let verifier = GroundingVerifier::new(
            Arc::new(StubCompleter::new("{}")),
            0.7,
            Duration::from_secs(30),
        );
        let result = verifier.verify("q", "a", &[]).await;
        assert!(!result.is_grounded);
        assert!((result.grounding_score - 0.0).abs() < f32::EPSILON);
    }
}
