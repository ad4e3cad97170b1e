//! Text mentor services over the Gemini `generateContent` REST API
//!
//! Three requests, each degrading instead of failing:
//! - routine mentorship (structured JSON, `None` on failure)
//! - weekly report (three typed insights, empty on failure)
//! - strategic advice (search-grounded prose, localized fallback text)

pub mod prompts;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::model::{AiInsight, AppState, DailyCheckIn, Language};
use crate::settings::AppSettings;

pub const GENERATE_CONTENT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Thinking budget granted to the strategy model
const STRATEGY_THINKING_BUDGET: u32 = 32768;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum MentorError {
    #[error("Gemini API key not configured. Set GEMINI_API_KEY or API_KEY.")]
    MissingApiKey,
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Gemini API error ({status}): {message}")]
    ApiError { status: u16, message: String },
    #[error("Failed to parse API response: {0}")]
    ParseError(String),
}

/// Routine adjustment suggested for the current check-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mentorship {
    pub message: String,
    pub adjustment: String,
    pub micro_habit: String,
    #[serde(default)]
    pub suggested_deferrals: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Concatenated text of the first candidate, `None` when there is none
fn response_text(body: &str) -> Result<Option<String>, MentorError> {
    let response: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| MentorError::ParseError(e.to_string()))?;

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let text = text.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

pub(crate) fn parse_mentorship(text: &str) -> Result<Mentorship, MentorError> {
    serde_json::from_str(text.trim()).map_err(|e| MentorError::ParseError(e.to_string()))
}

pub(crate) fn parse_insights(text: &str) -> Result<Vec<AiInsight>, MentorError> {
    serde_json::from_str(text.trim()).map_err(|e| MentorError::ParseError(e.to_string()))
}

fn mentorship_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "message": { "type": "STRING" },
            "adjustment": { "type": "STRING" },
            "microHabit": { "type": "STRING" },
            "suggestedDeferrals": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "IDs or names of tasks to defer when energy is low"
            }
        },
        "required": ["message", "adjustment", "microHabit"]
    })
}

fn insights_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "title": { "type": "STRING" },
                "content": { "type": "STRING" },
                "type": {
                    "type": "STRING",
                    "enum": ["motivational", "adjustment", "progress"]
                }
            },
            "required": ["title", "content", "type"]
        }
    })
}

/// Request body for a single-turn prompt
pub(crate) fn request_body(prompt: &str, generation_config: Option<Value>, tools: Option<Value>) -> Value {
    let mut body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
    });
    if let Some(config) = generation_config {
        body["generationConfig"] = config;
    }
    if let Some(tools) = tools {
        body["tools"] = tools;
    }
    body
}

/// Client for the mentor text services
#[derive(Debug, Clone)]
pub struct MentorClient {
    http: Client,
    api_key: Option<String>,
    base_url: String,
    mentor_model: String,
    strategy_model: String,
}

impl MentorClient {
    pub fn new(api_key: Option<String>, settings: &AppSettings) -> Result<Self, MentorError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MentorError::NetworkError(e.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: GENERATE_CONTENT_BASE_URL.to_string(),
            mentor_model: settings.mentor_model.clone(),
            strategy_model: settings.strategy_model.clone(),
        })
    }

    /// Point the client at another API host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Routine adjustments for the current energy and mood.
    /// Returns `None` if the request or the response is unusable.
    pub async fn routine_mentorship(
        &self,
        state: &AppState,
        check_in: Option<&DailyCheckIn>,
        language: Language,
    ) -> Option<Mentorship> {
        let prompt = prompts::routine_prompt(state, check_in, language);
        let config = json!({
            "responseMimeType": "application/json",
            "responseSchema": mentorship_schema(),
        });

        let result = self
            .generate(&self.mentor_model, request_body(&prompt, Some(config), None))
            .await
            .and_then(|text| parse_mentorship(text.as_deref().unwrap_or("{}")));

        match result {
            Ok(mentorship) => Some(mentorship),
            Err(e) => {
                log::error!("Mentor: routine mentorship failed: {}", e);
                None
            }
        }
    }

    /// Three insights on the past week. Empty if anything goes wrong.
    pub async fn weekly_report(&self, state: &AppState, language: Language) -> Vec<AiInsight> {
        let prompt = prompts::weekly_report_prompt(state, language);
        let config = json!({
            "responseMimeType": "application/json",
            "responseSchema": insights_schema(),
        });

        let result = self
            .generate(&self.mentor_model, request_body(&prompt, Some(config), None))
            .await
            .and_then(|text| parse_insights(text.as_deref().unwrap_or("[]")));

        match result {
            Ok(insights) => {
                log::info!("Mentor: weekly report with {} insights", insights.len());
                insights
            }
            Err(e) => {
                log::error!("Mentor: weekly report failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Deep strategic analysis grounded with web search
    pub async fn strategic_advice(&self, state: &AppState, language: Language) -> String {
        let prompt = prompts::strategy_prompt(state, language);
        let config = json!({
            "thinkingConfig": { "thinkingBudget": STRATEGY_THINKING_BUDGET },
        });
        let tools = json!([{ "googleSearch": {} }]);

        match self
            .generate(&self.strategy_model, request_body(&prompt, Some(config), Some(tools)))
            .await
        {
            Ok(Some(text)) => text,
            Ok(None) => prompts::strategy_empty_fallback(language).to_string(),
            Err(e) => {
                log::error!("Mentor: strategy analysis failed: {}", e);
                prompts::strategy_error_fallback(language).to_string()
            }
        }
    }

    async fn generate(&self, model: &str, body: Value) -> Result<Option<String>, MentorError> {
        let api_key = self.api_key.as_deref().ok_or(MentorError::MissingApiKey)?;
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        log::info!("Mentor: requesting {}", model);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MentorError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MentorError::NetworkError(e.to_string()))?;

        if status.is_success() {
            response_text(&body)
        } else {
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|r| r.error.message)
                .unwrap_or(body);
            Err(MentorError::ApiError {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InsightType;

    fn client_without_key() -> MentorClient {
        MentorClient::new(None, &AppSettings::default()).unwrap()
    }

    #[test]
    fn test_response_text_joins_first_candidate_parts() {
        let body = r#"{"candidates":[
            {"content":{"parts":[{"text":"Hello "},{"text":"there"}]}},
            {"content":{"parts":[{"text":"ignored"}]}}
        ]}"#;
        assert_eq!(response_text(body).unwrap(), Some("Hello there".to_string()));
    }

    #[test]
    fn test_response_text_without_candidates() {
        assert_eq!(response_text(r#"{"candidates":[]}"#).unwrap(), None);
        assert_eq!(response_text("{}").unwrap(), None);
        assert!(response_text("not json").is_err());
    }

    #[test]
    fn test_parse_mentorship() {
        let m = parse_mentorship(
            r#"{"message":"Go","adjustment":"Move gym","microHabit":"Drink water"}"#,
        )
        .unwrap();
        assert_eq!(m.micro_habit, "Drink water");
        assert!(m.suggested_deferrals.is_empty());

        assert!(parse_mentorship("{}").is_err());
    }

    #[test]
    fn test_parse_insights() {
        let insights = parse_insights(
            r#"[{"title":"A","content":"B","type":"motivational"},
                {"title":"C","content":"D","type":"adjustment"}]"#,
        )
        .unwrap();
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[1].insight_type, InsightType::Adjustment);
    }

    #[test]
    fn test_request_body_shape() {
        let body = request_body(
            "hi",
            Some(json!({"responseMimeType": "application/json"})),
            Some(json!([{"googleSearch": {}}])),
        );
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert!(body["tools"][0]["googleSearch"].is_object());

        let plain = request_body("hi", None, None);
        assert!(plain.get("generationConfig").is_none());
    }

    #[test]
    fn test_api_error_display() {
        let err = MentorError::ApiError {
            status: 403,
            message: "API key invalid".to_string(),
        };
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_missing_key_degrades() {
        let client = client_without_key();
        assert!(!client.is_configured());

        let state = AppState::default();
        assert!(client.routine_mentorship(&state, None, Language::En).await.is_none());
        assert!(client.weekly_report(&state, Language::En).await.is_empty());
        assert_eq!(
            client.strategic_advice(&state, Language::Pt).await,
            prompts::strategy_error_fallback(Language::Pt)
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_degrades() {
        let client = MentorClient::new(Some("key".to_string()), &AppSettings::default())
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        let state = AppState::default();
        assert!(client.routine_mentorship(&state, None, Language::En).await.is_none());
    }
}
