//! External image-classification client.
//!
//! Forwards uploaded photo bytes to a Gemini-compatible vision endpoint
//! and parses the model's JSON verdict. This call is read-only advisory:
//! it happens before any record creation and never touches the store, so
//! its failure cannot corrupt or partially commit a sighting.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::config::ClassifierConfig;
use crate::error::{ApiError, ApiResult};

/// The sixteen species of the local field guide. The classifier response
/// is flagged when the suggestion matches one of these.
pub const FIELD_GUIDE_SPECIES: [&str; 16] = [
    "Northern Cardinal",
    "American Robin",
    "Blue Jay",
    "House Sparrow",
    "European Starling",
    "American Crow",
    "Mourning Dove",
    "Red-tailed Hawk",
    "American Goldfinch",
    "Black-capped Chickadee",
    "White-breasted Nuthatch",
    "Downy Woodpecker",
    "Carolina Wren",
    "Eastern Bluebird",
    "Song Sparrow",
    "Dark-eyed Junco",
];

/// A species suggestion for an uploaded photo.
#[derive(Debug, Clone, Serialize)]
pub struct Identification {
    pub common_name: String,
    pub scientific_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    pub in_field_guide: bool,
}

/// What the model is asked to answer with.
#[derive(Debug, Deserialize)]
struct ModelVerdict {
    common_name: String,
    scientific_name: String,
    #[serde(default)]
    confidence: Option<String>,
}

pub struct Classifier {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl Classifier {
    pub fn new(config: &ClassifierConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    /// Ask the external classifier for a species suggestion.
    ///
    /// Any transport failure, non-success status, or unparseable verdict
    /// surfaces as `ApiError::Upstream` (502). Never retried here — the
    /// caller may retry.
    pub async fn identify(&self, image: &[u8], mime_type: &str) -> ApiResult<Identification> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inline_data": {
                            "mime_type": mime_type,
                            "data": base64::engine::general_purpose::STANDARD.encode(image),
                        }
                    },
                    { "text": identification_prompt() },
                ],
            }],
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Upstream(format!(
                "classifier returned HTTP {status}"
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("bad response body: {e}")))?;

        let text = extract_text(&payload)
            .ok_or_else(|| ApiError::Upstream("response carried no text part".into()))?;

        let verdict: ModelVerdict = serde_json::from_str(strip_code_fences(&text))
            .map_err(|e| ApiError::Upstream(format!("unparseable verdict: {e}")))?;

        let in_field_guide = FIELD_GUIDE_SPECIES
            .iter()
            .any(|s| s.eq_ignore_ascii_case(verdict.common_name.trim()));

        Ok(Identification {
            common_name: verdict.common_name,
            scientific_name: verdict.scientific_name,
            confidence: verdict.confidence,
            in_field_guide,
        })
    }
}

fn identification_prompt() -> String {
    let field_guide = FIELD_GUIDE_SPECIES.join(", ");
    format!(
        "You are an expert ornithologist. Analyze this bird image and respond \
         with exactly this JSON, nothing else:\n\
         {{\"common_name\": \"Bird Common Name\", \"scientific_name\": \"Genus species\", \
         \"confidence\": \"high/medium/low\"}}\n\
         Notable local species to consider first: {field_guide}.\n\
         If the image does not contain an identifiable bird, use \"Unknown\" for \
         both names and \"none\" for confidence."
    )
}

/// Concatenate the text parts of the first candidate.
fn extract_text(payload: &serde_json::Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    (!text.is_empty()).then_some(text)
}

/// Models wrap JSON in markdown fences often enough that tolerating them
/// is cheaper than prompting harder.
fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> ClassifierConfig {
        ClassifierConfig {
            base_url,
            api_key: "test-key".into(),
            model: "gemini-2.5-flash".into(),
            timeout_secs: 5,
        }
    }

    fn gemini_reply(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }] }
            }]
        })
    }

    #[test]
    fn fence_stripping() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn prompt_names_the_field_guide_species() {
        let prompt = identification_prompt();
        assert!(prompt.contains("Northern Cardinal"));
        assert!(prompt.contains("Dark-eyed Junco"));
    }

    #[tokio::test]
    async fn identify_parses_a_clean_verdict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply(
                r#"{"common_name": "Northern Cardinal", "scientific_name": "Cardinalis cardinalis", "confidence": "high"}"#,
            )))
            .mount(&server)
            .await;

        let classifier = Classifier::new(&test_config(server.uri())).unwrap();
        let result = classifier.identify(b"not-really-a-jpeg", "image/jpeg").await.unwrap();

        assert_eq!(result.common_name, "Northern Cardinal");
        assert_eq!(result.scientific_name, "Cardinalis cardinalis");
        assert_eq!(result.confidence.as_deref(), Some("high"));
        assert!(result.in_field_guide);
    }

    #[tokio::test]
    async fn identify_tolerates_markdown_fences() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply(
                "```json\n{\"common_name\": \"Scarlet Tanager\", \"scientific_name\": \"Piranga olivacea\", \"confidence\": \"medium\"}\n```",
            )))
            .mount(&server)
            .await;

        let classifier = Classifier::new(&test_config(server.uri())).unwrap();
        let result = classifier.identify(b"img", "image/jpeg").await.unwrap();
        assert_eq!(result.common_name, "Scarlet Tanager");
        assert!(!result.in_field_guide);
    }

    #[tokio::test]
    async fn upstream_http_error_is_a_502() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let classifier = Classifier::new(&test_config(server.uri())).unwrap();
        let err = classifier.identify(b"img", "image/jpeg").await.unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
    }

    #[tokio::test]
    async fn unparseable_verdict_is_a_502() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(gemini_reply("the bird is probably a cardinal")),
            )
            .mount(&server)
            .await;

        let classifier = Classifier::new(&test_config(server.uri())).unwrap();
        let err = classifier.identify(b"img", "image/jpeg").await.unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
    }

    #[tokio::test]
    async fn unreachable_classifier_is_a_502() {
        // Nothing listens on this port.
        let classifier =
            Classifier::new(&test_config("http://127.0.0.1:9".into())).unwrap();
        let err = classifier.identify(b"img", "image/jpeg").await.unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
    }
}
