use std::time::Duration;

use anyhow::{Context as _, Result, anyhow, bail};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::ranker::ScoredVerse;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct LlmConfig {
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            api_key: String::new(),
            temperature: 0.7,
            max_output_tokens: 1024,
        }
    }
}

impl LlmConfig {
    /// Reads the API key from the environment (`.env` is loaded at startup).
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY").map_err(|_| {
            anyhow!("GOOGLE_API_KEY missing; set it in the environment or a .env file")
        })?;
        Ok(LlmConfig {
            api_key,
            ..LlmConfig::default()
        })
    }
}

pub struct Llm {
    client: Client,
    config: LlmConfig,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl Llm {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Llm { client, config })
    }

    /// Asks the generative model for a response grounded in the verses.
    pub async fn generate_guidance(&self, query: &str, verses: &[ScoredVerse]) -> Result<String> {
        let prompt = construct_prompt(query, verses);
        let url = format!(
            "{API_BASE}/{}:generateContent?key={}",
            self.config.model, self.config.api_key
        );
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("the AI service took too long to respond; try again")
                } else if e.is_connect() {
                    anyhow!("could not reach the AI service; check your connection")
                } else {
                    anyhow!("network error: {e}")
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!(match status.as_u16() {
                400 | 401 | 403 =>
                    format!("the AI service rejected the request ({status}); check your API key"),
                429 => "the AI service is rate limiting; wait a moment and resubmit".to_string(),
                500..=599 => format!("the AI service failed ({status}); resubmit the query"),
                _ => format!("unexpected AI service response {status}: {detail}"),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .context("failed to parse the AI service response")?;
        extract_text(parsed)
    }
}

/// Joins the retrieved passages into a context block and frames the query.
fn construct_prompt(query: &str, verses: &[ScoredVerse]) -> String {
    let context = verses
        .iter()
        .map(|v| format!("{}: {}", v.reference, v.text))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "User: {query}\nVerses: {context}\nProvide a comforting, biblical response using these verses. Keep it solemn, elegant, and wise."
    )
}

fn extract_text(response: GenerateResponse) -> Result<String> {
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        bail!("the AI service returned an empty response; resubmit the query");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verse(reference: &str, text: &str) -> ScoredVerse {
        ScoredVerse {
            reference: reference.into(),
            text: text.into(),
            score: 0.9,
        }
    }

    #[test]
    fn prompt_contains_query_and_every_verse() {
        let verses = vec![
            verse("Psalm 23:1", "The Lord is my shepherd; I shall not want."),
            verse("John 14:27", "Peace I leave with you, my peace I give unto you."),
        ];
        let prompt = construct_prompt("I am anxious", &verses);

        assert!(prompt.contains("User: I am anxious"));
        assert!(prompt.contains("Psalm 23:1: The Lord is my shepherd; I shall not want."));
        assert!(prompt.contains("John 14:27: Peace I leave with you, my peace I give unto you."));
        assert!(prompt.contains("comforting, biblical response"));
    }

    #[test]
    fn response_text_is_extracted_across_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"Take "},{"text":"heart."}],"role":"model"},"finishReason":"STOP"}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(extract_text(parsed).unwrap(), "Take heart.");
    }

    #[test]
    fn empty_candidates_are_an_error() {
        let parsed: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(extract_text(parsed).is_err());
    }

    #[test]
    fn default_config_targets_flash() {
        let config = LlmConfig::default();
        assert_eq!(config.model, "gemini-2.0-flash");
        assert_eq!(config.max_output_tokens, 1024);
    }
}
