// Summarizer module
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::{LlmProvider, LlmRequest};
use crate::error::SummarizeError;
use crate::model::{DecisionRecord, SummaryRecord};
use crate::scraping::{self, OpinionSource};

/// Produces the summary record of one decision.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, decision: &DecisionRecord) -> Result<SummaryRecord, SummarizeError>;
}

/// Summarizes a decision by scraping its opinion page and asking an LLM for a
/// Background / Holding / Reasoning / Outcome write-up.
pub struct LlmSummarizer {
    provider: Arc<dyn LlmProvider>,
    opinions: Arc<dyn OpinionSource>,
    max_prompt_chars: usize,
    max_tokens: usize,
    temperature: f32,
}

impl LlmSummarizer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        opinions: Arc<dyn OpinionSource>,
        max_prompt_chars: usize,
    ) -> Self {
        Self {
            provider,
            opinions,
            max_prompt_chars,
            max_tokens: 650,
            temperature: 0.2,
        }
    }

    pub fn with_generation(mut self, max_tokens: usize, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

#[async_trait::async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, decision: &DecisionRecord) -> Result<SummaryRecord, SummarizeError> {
        let page = self.opinions.fetch_opinion_page(&decision.url).await?;
        let text = scraping::extract_case_text(&page, self.max_prompt_chars);
        if text.trim().is_empty() {
            return Err(SummarizeError::MissingText {
                url: decision.url.clone(),
            });
        }

        let response = self
            .provider
            .generate(LlmRequest {
                prompt: build_prompt(&text),
                max_tokens: Some(self.max_tokens),
                temperature: Some(self.temperature),
                timeout_seconds: None,
            })
            .await?;

        let summary = normalize_summary(&response.content);
        if summary.is_empty() {
            return Err(SummarizeError::EmptySummary);
        }

        info!(
            id = %decision.id,
            chars = summary.len(),
            total_tokens = response.usage.total_tokens,
            "LLM summarization successful"
        );

        Ok(SummaryRecord {
            id: decision.id.clone(),
            text: summary,
            generated_at: Utc::now(),
            model: response.model,
        })
    }
}

/// Used when no model can be reached at startup (e.g. no API key). Every
/// decision is published without a summary and backfilled later.
pub struct UnavailableSummarizer {
    reason: String,
}

impl UnavailableSummarizer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait::async_trait]
impl Summarizer for UnavailableSummarizer {
    async fn summarize(&self, _decision: &DecisionRecord) -> Result<SummaryRecord, SummarizeError> {
        Err(SummarizeError::Unavailable(self.reason.clone()))
    }
}

/// Prompt asking for a ~300 word summary under four fixed headings.
pub fn build_prompt(extracted_text: &str) -> String {
    [
        "You are a careful legal editor. Do not invent facts; if missing, write 'Not stated.'",
        "Write ~300 words total (260-340). Plain English but legally precise. Avoid long quotes.",
        "",
        "IMPORTANT:",
        "- Do NOT include the case name/caption, docket number, court name, decided date, or source URL.",
        "- Do NOT start with 'In this case...' + caption. Assume metadata is shown elsewhere.",
        "",
        "Output EXACTLY these headings, in this order:",
        "Background:",
        "Holding:",
        "Reasoning:",
        "Outcome:",
        "",
        "Background should include procedural posture + what question the Court answered (if stated).",
        "Holding should be 1-2 sentences.",
        "Outcome must say affirmed/reversed/vacated/remanded and what happens next (if stated).",
        "",
        "Source text:",
        extracted_text,
    ]
    .join("\n")
}

fn normalize_summary(raw: &str) -> String {
    raw.replace('\r', "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, UsageMetadata};
    use crate::scraping::OpinionFetcher;

    fn fetcher() -> Arc<dyn OpinionSource> {
        Arc::new(OpinionFetcher::new(reqwest::Client::new()))
    }

    struct CannedProvider {
        reply: String,
    }

    #[async_trait::async_trait]
    impl LlmProvider for CannedProvider {
        async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
            assert!(request.prompt.contains("Source text:"));
            Ok(LlmResponse {
                content: self.reply.clone(),
                usage: UsageMetadata::default(),
                model: "canned-model".to_string(),
            })
        }

        fn model(&self) -> &str {
            "canned-model"
        }
    }

    #[test]
    fn prompt_lists_headings_in_order_and_ends_with_source() {
        let prompt = build_prompt("OPINION TEXT");
        let positions: Vec<usize> = ["Background:", "Holding:", "Reasoning:", "Outcome:"]
            .iter()
            .map(|h| prompt.find(h).expect("heading present"))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(prompt.ends_with("Source text:\nOPINION TEXT"));
    }

    #[tokio::test]
    async fn summarizes_scraped_opinion() {
        let mut server = mockito::Server::new_async().await;
        let page = server
            .mock("GET", "/opinion")
            .with_status(200)
            .with_body("<html><body><div class=\"bodytext\"><p>The Court holds.</p></div></body></html>")
            .create_async()
            .await;

        let provider = Arc::new(CannedProvider {
            reply: "  Background:\r\nA dispute.\n\nHolding:\nAffirmed.  ".to_string(),
        });
        let summarizer = LlmSummarizer::new(provider, fetcher(), 80_000);
        let decision = DecisionRecord::new("A v. B", format!("{}/opinion", server.url()));

        let summary = summarizer.summarize(&decision).await.expect("summary");
        assert_eq!(summary.id, decision.id);
        assert_eq!(summary.text, "Background:\nA dispute.\n\nHolding:\nAffirmed.");
        assert_eq!(summary.model, "canned-model");
        page.assert_async().await;
    }

    #[tokio::test]
    async fn empty_model_reply_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _page = server
            .mock("GET", "/opinion")
            .with_status(200)
            .with_body("<html><body><p>Text.</p></body></html>")
            .create_async()
            .await;

        let provider = Arc::new(CannedProvider {
            reply: "   ".to_string(),
        });
        let summarizer = LlmSummarizer::new(provider, fetcher(), 80_000);
        let decision = DecisionRecord::new("A v. B", format!("{}/opinion", server.url()));

        let err = summarizer.summarize(&decision).await.expect_err("must fail");
        assert!(matches!(err, SummarizeError::EmptySummary));
    }

    #[tokio::test]
    async fn page_without_text_is_missing_text() {
        let mut server = mockito::Server::new_async().await;
        let _page = server
            .mock("GET", "/opinion")
            .with_status(200)
            .with_body("<html><body><script>x()</script></body></html>")
            .create_async()
            .await;

        let provider = Arc::new(CannedProvider {
            reply: "unused".to_string(),
        });
        let summarizer = LlmSummarizer::new(provider, fetcher(), 80_000);
        let decision = DecisionRecord::new("A v. B", format!("{}/opinion", server.url()));

        let err = summarizer.summarize(&decision).await.expect_err("must fail");
        assert!(matches!(err, SummarizeError::MissingText { .. }));
    }

    #[tokio::test]
    async fn unavailable_summarizer_always_fails() {
        let summarizer = UnavailableSummarizer::new("Missing LLM API key");
        let err = summarizer
            .summarize(&DecisionRecord::new("A v. B", "https://example.com/a"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, SummarizeError::Unavailable(_)));
        assert!(err.to_string().contains("Missing LLM API key"));
    }
}
