use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::LlmConfig;
use crate::shared::models::ImageAttachment;

const LLM_TIMEOUT: Duration = Duration::from_secs(30);

/// System instruction for the classification call. The model must answer
/// with a single JSON object carrying exactly the six fields the pipeline
/// persists.
const SYSTEM_PROMPT: &str = "Ты — классификатор обращений клиентов службы поддержки. \
Проанализируй текст обращения (и приложенные изображения, если есть) и верни \
СТРОГО один JSON-объект без пояснений, со следующими полями:\n\
  \"category\": тип обращения (например \"Жалоба\", \"Консультация\", \"Запрос\"),\n\
  \"sentiment\": тональность (\"Позитивный\", \"Нейтральный\", \"Негативный\"),\n\
  \"priority\": целое число от 0 до 10,\n\
  \"language\": код языка обращения (например \"RU\", \"KZ\", \"EN\"),\n\
  \"summary\": краткое содержание в одно-два предложения,\n\
  \"recommendation\": рекомендация оператору по дальнейшим действиям.";

/// The six classification fields, parsed strictly: a response missing any
/// field (or with a mistyped one) is a `Parse` failure, never a partial
/// success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAnalysis {
    pub category: String,
    pub sentiment: String,
    pub priority: i32,
    pub language: String,
    pub summary: String,
    pub recommendation: String,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("llm returned {code}: {message}")]
    Status { code: u16, message: String },
    #[error("llm response carried no content")]
    EmptyResponse,
    #[error("llm content is not a valid analysis object: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// User-turn content: plain text without images, multi-part otherwise.
/// Inline images become `data:{mime};base64,{data}` URLs.
fn build_user_content(text: &str, images: &[ImageAttachment]) -> Value {
    if images.is_empty() {
        return Value::String(text.to_string());
    }

    let mut parts = vec![json!({ "type": "text", "text": text })];
    for image in images {
        let url = match image {
            ImageAttachment::Url { data } => data.clone(),
            ImageAttachment::Base64 { data, mime_type } => {
                let mime = mime_type.as_deref().unwrap_or("image/jpeg");
                format!("data:{mime};base64,{data}")
            }
        };
        parts.push(json!({ "type": "image_url", "image_url": { "url": url } }));
    }
    Value::Array(parts)
}

/// One classification call against the OpenAI-shaped endpoint.
///
/// Any failure here feeds the pipeline's fixed fallback; nothing is retried
/// at this level and the bounded timeout keeps workers from hanging.
pub async fn classify(
    config: &LlmConfig,
    http: &reqwest::Client,
    text: &str,
    images: &[ImageAttachment],
) -> Result<LlmAnalysis, LlmError> {
    let body = json!({
        "model": config.model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": build_user_content(text, images) },
        ],
        "response_format": { "type": "json_object" },
        "temperature": 0.1,
    });

    let response = http
        .post(format!("{}/chat/completions", config.base_url))
        .header("Authorization", format!("Bearer {}", config.api_key))
        .timeout(LLM_TIMEOUT)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        let message = payload
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(LlmError::Status {
            code: status.as_u16(),
            message,
        });
    }

    let payload: ChatCompletionResponse = response.json().await?;
    let content = payload
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_deref())
        .ok_or(LlmError::EmptyResponse)?;

    Ok(serde_json::from_str(content)?)
}
