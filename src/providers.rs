use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::errors::GenerationError;
use crate::ports::{DraftContext, GenerationProvider};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_DRAFT_TOKENS: u32 = 1024;

pub const GEMINI_PROVIDER_NAME: &str = "Gemini";
pub const CLAUDE_PROVIDER_NAME: &str = "Claude";

fn draft_prompt(context: &DraftContext, count: usize) -> String {
    let mut prompt = format!(
        "Write {count} distinct first-person review drafts for \"{}\".",
        context.place_name
    );
    if let Some(address) = &context.address {
        prompt.push_str(&format!(" The place is at {address}."));
    }
    if let Some(rating) = context.rating {
        prompt.push_str(&format!(" The visitor rated it {rating} out of 5."));
    }
    if let Some(notes) = &context.notes {
        prompt.push_str(&format!(" Visitor notes: {notes}."));
    }
    prompt.push_str(
        " Respond with a JSON array of strings, one entry per draft, and nothing else.",
    );
    prompt
}

/// Model replies are asked for as a bare JSON array, but some models wrap it
/// in markdown fences; strip those before parsing.
fn parse_draft_array(provider: &str, raw: &str) -> Result<Vec<String>, GenerationError> {
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str::<Vec<String>>(trimmed)
        .map_err(|_| GenerationError::MalformedResponse(provider.to_string()))
}

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: SecretString,
    api_base: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: SecretString, api_base: String, model: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("gemini http client");
        Self {
            http,
            api_key,
            api_base,
            model,
        }
    }
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    fn name(&self) -> &str {
        GEMINI_PROVIDER_NAME
    }

    async fn generate_drafts(
        &self,
        context: &DraftContext,
        count: usize,
    ) -> Result<Vec<String>, GenerationError> {
        #[derive(serde::Serialize)]
        struct RequestBody {
            contents: Vec<Content>,
            #[serde(rename = "generationConfig")]
            generation_config: GenerationConfig,
        }

        #[derive(serde::Serialize)]
        struct Content {
            parts: Vec<Part>,
        }

        #[derive(serde::Serialize)]
        #[serde(untagged)]
        enum Part {
            Text {
                text: String,
            },
            Image {
                #[serde(rename = "inlineData")]
                inline_data: InlineData,
            },
        }

        #[derive(serde::Serialize)]
        struct InlineData {
            #[serde(rename = "mimeType")]
            mime_type: &'static str,
            data: String,
        }

        #[derive(serde::Serialize)]
        struct GenerationConfig {
            #[serde(rename = "responseMimeType")]
            response_mime_type: &'static str,
        }

        #[derive(serde::Deserialize)]
        struct Response {
            candidates: Option<Vec<Candidate>>,
        }

        #[derive(serde::Deserialize)]
        struct Candidate {
            content: Option<CandidateContent>,
        }

        #[derive(serde::Deserialize)]
        struct CandidateContent {
            parts: Option<Vec<CandidatePart>>,
        }

        #[derive(serde::Deserialize)]
        struct CandidatePart {
            text: Option<String>,
        }

        let mut parts = vec![Part::Text {
            text: draft_prompt(context, count),
        }];
        for photo in &context.photos {
            parts.push(Part::Image {
                inline_data: InlineData {
                    mime_type: "image/jpeg",
                    data: base64::engine::general_purpose::STANDARD.encode(photo),
                },
            });
        }

        let body = RequestBody {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };
        debug!(count, photos = context.photos.len(), "requesting gemini drafts");

        let response = self
            .http
            .post(format!(
                "{}/models/{}:generateContent",
                self.api_base, self.model
            ))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: Response = response.json().await?;
        // Candidates arrive best-first; only the top one is used.
        let text = parsed
            .candidates
            .and_then(|list| list.into_iter().next())
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts)
            .and_then(|parts| parts.into_iter().find_map(|part| part.text))
            .ok_or_else(|| GenerationError::Api {
                provider: GEMINI_PROVIDER_NAME.into(),
                message: "empty response".into(),
            })?;

        parse_draft_array(GEMINI_PROVIDER_NAME, &text)
    }
}

pub struct ClaudeProvider {
    http: reqwest::Client,
    api_key: SecretString,
    api_base: String,
    model: String,
}

impl ClaudeProvider {
    pub fn new(api_key: SecretString, api_base: String, model: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("claude http client");
        Self {
            http,
            api_key,
            api_base,
            model,
        }
    }
}

#[async_trait]
impl GenerationProvider for ClaudeProvider {
    fn name(&self) -> &str {
        CLAUDE_PROVIDER_NAME
    }

    async fn generate_drafts(
        &self,
        context: &DraftContext,
        count: usize,
    ) -> Result<Vec<String>, GenerationError> {
        #[derive(serde::Serialize)]
        struct RequestBody {
            model: String,
            max_tokens: u32,
            messages: Vec<Message>,
        }

        #[derive(serde::Serialize)]
        struct Message {
            role: &'static str,
            content: Vec<ContentBlock>,
        }

        #[derive(serde::Serialize)]
        #[serde(tag = "type")]
        enum ContentBlock {
            #[serde(rename = "text")]
            Text { text: String },
            #[serde(rename = "image")]
            Image { source: ImageSource },
        }

        #[derive(serde::Serialize)]
        struct ImageSource {
            #[serde(rename = "type")]
            kind: &'static str,
            media_type: &'static str,
            data: String,
        }

        #[derive(serde::Deserialize)]
        struct Response {
            content: Option<Vec<ResponseBlock>>,
        }

        #[derive(serde::Deserialize)]
        struct ResponseBlock {
            text: Option<String>,
        }

        let mut content = vec![ContentBlock::Text {
            text: draft_prompt(context, count),
        }];
        for photo in &context.photos {
            content.push(ContentBlock::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: "image/jpeg",
                    data: base64::engine::general_purpose::STANDARD.encode(photo),
                },
            });
        }

        let body = RequestBody {
            model: self.model.clone(),
            max_tokens: MAX_DRAFT_TOKENS * count as u32,
            messages: vec![Message {
                role: "user",
                content,
            }],
        };
        debug!(count, photos = context.photos.len(), "requesting claude drafts");

        let response = self
            .http
            .post(format!("{}/messages", self.api_base))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: Response = response.json().await?;
        let text = parsed
            .content
            .unwrap_or_default()
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| GenerationError::Api {
                provider: CLAUDE_PROVIDER_NAME.into(),
                message: "empty response".into(),
            })?;

        parse_draft_array(CLAUDE_PROVIDER_NAME, &text)
    }
}
