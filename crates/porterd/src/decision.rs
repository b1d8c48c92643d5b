//! Decision service — the language-model calls behind visitor-detail
//! extraction, approval judgment, and free-form queries.
//!
//! Every call site degrades on failure: extraction errors re-prompt,
//! judgment errors deny, query errors apologize. No transport fault may
//! advance session state.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const EXTRACT_MAX_TOKENS: u32 = 50;
const JUDGE_MAX_TOKENS: u32 = 50;
const ANSWER_MAX_TOKENS: u32 = 150;

#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("api key not configured")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider error {0}: {1}")]
    Provider(u16, String),
    #[error("response contained no choices")]
    EmptyResponse,
}

/// Verdict on a visitor approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Denied,
}

/// Ledger context handed to free-form queries.
#[derive(Debug, Clone, Default)]
pub struct LedgerContext {
    /// (name, time) pairs for today.
    pub todays_entries: Vec<(String, String)>,
    pub enrolled_names: Vec<String>,
    /// Preformatted recent visitor decision lines.
    pub recent_visitors: Vec<String>,
}

#[async_trait]
pub trait DecisionService: Send + Sync {
    /// Extract `(visitor name, whom to meet)` from free text.
    /// `Ok(None)` is the recognizable could-not-parse signal.
    async fn extract_visitor(&self, text: &str)
        -> Result<Option<(String, String)>, DecisionError>;

    /// Approve or deny the visit. Callers map `Err` to `Denied`.
    async fn judge(
        &self,
        visitor: &str,
        whom: &str,
        reply: Option<&str>,
    ) -> Result<Verdict, DecisionError>;

    /// Answer a free-form query over ledger context.
    async fn answer(&self, query: &str, context: &LedgerContext) -> Result<String, DecisionError>;
}

/// Chat-completions backed decision service.
pub struct OpenAiDecisionService {
    http: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl OpenAiDecisionService {
    pub fn new(
        endpoint: String,
        model: String,
        api_key: Option<String>,
    ) -> Result<Self, DecisionError> {
        Ok(Self {
            http: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            endpoint,
            model,
            api_key,
        })
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, DecisionError> {
        let api_key = self.api_key.as_deref().ok_or(DecisionError::MissingApiKey)?;

        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": max_tokens,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(DecisionError::Provider(status, text));
        }

        let body: ChatResponse = response.json().await?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or(DecisionError::EmptyResponse)?;
        Ok(choice.message.content.trim().to_string())
    }
}

#[async_trait]
impl DecisionService for OpenAiDecisionService {
    async fn extract_visitor(
        &self,
        text: &str,
    ) -> Result<Option<(String, String)>, DecisionError> {
        let user = format!(
            "Extract the visitor's name and whom they want to meet from this message: \
             '{text}'. Respond with 'Name: [name], Whom: [whom]'."
        );
        let parsed = self
            .complete(
                "You are an assistant that extracts information from text.",
                &user,
                EXTRACT_MAX_TOKENS,
            )
            .await?;
        Ok(parse_name_whom(&parsed))
    }

    async fn judge(
        &self,
        visitor: &str,
        whom: &str,
        reply: Option<&str>,
    ) -> Result<Verdict, DecisionError> {
        let reply_line = match reply {
            Some(r) => format!("Reply from {whom}: {r}"),
            None => "No reply yet.".to_string(),
        };
        let user = format!(
            "Visitor {visitor} wants to meet {whom}.\n{reply_line}\n\
             Decide approval: yes or no, with reason."
        );
        let verdict = self
            .complete(
                "You are an assistant deciding visitor access.",
                &user,
                JUDGE_MAX_TOKENS,
            )
            .await?;

        Ok(if verdict.to_lowercase().contains("yes") {
            Verdict::Approved
        } else {
            Verdict::Denied
        })
    }

    async fn answer(&self, query: &str, context: &LedgerContext) -> Result<String, DecisionError> {
        let user = format!(
            "Current data:\n\
             - Today's entries: {:?}\n\
             - Registered identities: {:?}\n\
             - Recent visitors: {:?}\n\n\
             User query: {query}\n\n\
             Respond naturally.",
            context.todays_entries, context.enrolled_names, context.recent_visitors,
        );
        self.complete(
            "You are a helpful assistant for a facility access system.",
            &user,
            ANSWER_MAX_TOKENS,
        )
        .await
    }
}

/// Parse the `Name: ..., Whom: ...` shape the extraction prompt requests.
fn parse_name_whom(text: &str) -> Option<(String, String)> {
    let name_idx = text.find("Name:")?;
    let whom_idx = text.find("Whom:")?;
    if whom_idx < name_idx {
        return None;
    }

    let between = &text[name_idx + "Name:".len()..whom_idx];
    let name = between.split(',').next()?.trim();
    let whom = text[whom_idx + "Whom:".len()..]
        .trim()
        .trim_end_matches('.')
        .trim();

    if name.is_empty() || whom.is_empty() {
        return None;
    }
    Some((name.to_string(), whom.to_string()))
}
