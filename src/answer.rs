//! Question answering over the index.
//!
//! [`QueryEngine::ask`] runs the whole query path: retrieve passages,
//! assemble a context window, and ask the chat model to answer from that
//! context only. When retrieval comes back empty the model is not called
//! and [`AnswerOutcome::Insufficient`] is returned instead.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{require_env, AnswerConfig, Config};
use crate::context::assemble;
use crate::embedding::EmbeddingService;
use crate::error::PipelineError;
use crate::http;
use crate::index::VectorIndex;
use crate::models::ScoredPassage;
use crate::retrieve::Retriever;
use crate::tokens::TokenCounter;

/// The reply used whenever the context cannot support an answer.
pub const INSUFFICIENT_INFORMATION: &str =
    "I don't have enough information in the provided context to answer this question completely.";

const CHAT_MAX_RETRIES: u32 = 3;
const PREVIEW_CHARS: usize = 300;

/// A chat-completion backend.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

pub fn system_prompt(subject: &str) -> String {
    format!(
        "You are a helpful assistant that answers questions based on provided context from {subject}.\n\
         \n\
         Instructions:\n\
         - Answer the question based ONLY on the provided context\n\
         - If the context doesn't contain enough information, say \"{INSUFFICIENT_INFORMATION}\"\n\
         - Be specific and cite relevant details from the context\n\
         - If you find conflicting information, mention it\n\
         - Keep your answers concise but comprehensive\n\
         - Use bullet points or numbered lists when appropriate for clarity"
    )
}

pub fn user_prompt(subject: &str, context: &str, question: &str) -> String {
    format!(
        "Context from {subject}:\n{context}\n\nQuestion: {question}\n\n\
         Please answer the question based on the context provided above."
    )
}

// ============ OpenAI chat ============

/// Chat completions via `POST {url}/chat/completions`.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    url: String,
}

impl OpenAiChat {
    pub fn new(config: &AnswerConfig) -> std::result::Result<Self, PipelineError> {
        let api_key = require_env("OPENAI_API_KEY")?;
        Ok(Self::with_api_key(config, api_key)?)
    }

    pub fn with_api_key(config: &AnswerConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiChat {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let endpoint = format!("{}/chat/completions", self.url);

        let json = http::send_json_with_retry("OpenAI chat", CHAT_MAX_RETRIES, || {
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        parse_chat_response(&json).context("Invalid OpenAI chat response")
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("missing choices[0].message.content"))
}

// ============ Query engine ============

/// Result of one question.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerOutcome {
    /// The model answered from the retrieved context.
    Answered {
        answer: String,
        sources: Vec<String>,
        passages: Vec<ScoredPassage>,
    },
    /// Nothing relevant was retrieved.
    Insufficient,
    /// Retrieval or generation failed for this question.
    Unavailable { reason: String },
}

impl AnswerOutcome {
    /// Text to show the user.
    pub fn message(&self) -> &str {
        match self {
            AnswerOutcome::Answered { answer, .. } => answer,
            AnswerOutcome::Insufficient => INSUFFICIENT_INFORMATION,
            AnswerOutcome::Unavailable { .. } => "Unable to answer right now; please try again.",
        }
    }
}

pub struct QueryEngine {
    retriever: Retriever,
    generator: Arc<dyn AnswerGenerator>,
    counter: TokenCounter,
    subject: String,
    top_k: usize,
    max_context_tokens: usize,
}

impl QueryEngine {
    pub fn new(
        retriever: Retriever,
        generator: Arc<dyn AnswerGenerator>,
        counter: TokenCounter,
        subject: &str,
        top_k: usize,
        max_context_tokens: usize,
    ) -> Self {
        Self {
            retriever,
            generator,
            counter,
            subject: subject.to_string(),
            top_k,
            max_context_tokens,
        }
    }

    /// Build an engine from configuration after verifying the index.
    ///
    /// Fails with `IndexNotFound`, `IndexNotReady` or `DimensionMismatch`
    /// before any question is asked.
    pub async fn connect(
        config: &Config,
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> std::result::Result<Self, PipelineError> {
        let retriever = Retriever::connect(
            embedder,
            index,
            &config.index.name,
            config.index.namespace.clone(),
        )
        .await?;
        Ok(Self::new(
            retriever,
            generator,
            TokenCounter::for_model(&config.answer.model),
            &config.answer.subject,
            config.retrieval.top_k,
            config.retrieval.max_context_tokens,
        ))
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer `question` with the configured `top_k` and context budget.
    pub async fn ask(&self, question: &str) -> std::result::Result<AnswerOutcome, PipelineError> {
        self.ask_with(question, self.top_k, self.max_context_tokens)
            .await
    }

    /// Answer `question`.
    ///
    /// Only fatal configuration errors are returned as `Err`; a failed
    /// search or completion becomes [`AnswerOutcome::Unavailable`].
    pub async fn ask_with(
        &self,
        question: &str,
        top_k: usize,
        max_context_tokens: usize,
    ) -> std::result::Result<AnswerOutcome, PipelineError> {
        let passages = match self.retriever.search(question, top_k).await {
            Ok(p) => p,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "retrieval failed");
                return Ok(AnswerOutcome::Unavailable {
                    reason: format!("{:#}", e),
                });
            }
        };

        let window = assemble(&passages, max_context_tokens, &self.counter);
        if window.is_empty() {
            info!("no passages retrieved");
            return Ok(AnswerOutcome::Insufficient);
        }
        info!(
            passages = window.sources.len(),
            tokens = window.token_count,
            "assembled context"
        );

        let system = system_prompt(&self.subject);
        let user = user_prompt(&self.subject, &window.text, question);
        match self.generator.complete(&system, &user).await {
            Ok(answer) => Ok(AnswerOutcome::Answered {
                answer,
                sources: window.sources,
                passages,
            }),
            Err(e) => {
                warn!(error = %e, "answer generation failed");
                Ok(AnswerOutcome::Unavailable {
                    reason: format!("{:#}", e),
                })
            }
        }
    }
}

/// Human-readable listing of search hits.
pub fn format_search_results(results: &[ScoredPassage]) -> String {
    if results.is_empty() {
        return "No relevant documents found.".to_string();
    }

    let mut out = String::new();
    for (i, r) in results.iter().enumerate() {
        let m = &r.metadata;
        let filename = if m.filename.is_empty() {
            "Unknown"
        } else {
            m.filename.as_str()
        };
        let note = if m.content_truncated {
            " [content was truncated during storage]"
        } else {
            ""
        };

        let preview: String = m.content.chars().take(PREVIEW_CHARS).collect();
        let ellipsis = if m.content.chars().count() > PREVIEW_CHARS {
            "..."
        } else {
            ""
        };

        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!(
            "{}. {} (chunk {}) - Relevance: {:.3}{}\n{}{}\n",
            i + 1,
            filename,
            m.chunk_index,
            r.score,
            note,
            preview,
            ellipsis
        ));
    }
    out
}
