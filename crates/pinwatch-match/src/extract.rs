//! Structured extraction from raw ad markdown via a chat-completion model.

use anyhow::Context;
use async_trait::async_trait;
use pinwatch_core::{AdInfo, ExtractedAd, ProductGuess};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const EXTRACTION_PROMPT: &str = r#"You are an expert at analyzing pinball machine ads and extracting structured information.

Here is a scraped ad in markdown format:

```markdown
{content}
```

Please analyze the ad text and:

1. AD INFORMATION - Extract these details from the ad:
- title: A clear, concise title for this ad (what would appear as the listing title)
- description: The main description text of the ad (without title, price, location)
- price: The asking price (extract amount and currency)
- location: The location where the item is located (extract city and zipcode)
- seller: The seller name
- seller_url: The seller's profile URL or seller's shop URL (link on the seller name if available)

2. PRODUCT IDENTIFICATION: The pinball machine being sold:
- Identify the specific pinball machine name
- Determine the manufacturer
- Determine the year of release

Return your response as a JSON object with this exact structure:
{
"info": {
    "title": "extracted ad title. Escape double quotes with a backslash and remove non-ascii chars.",
    "description": "extracted ad description. Escape double quotes with a backslash and remove non-ascii chars. Transform newlines to spaces.",
    "amount": "extracted price amount without currency as an integer or null if not found",
    "currency": "EUR",
    "city": "location city name or null",
    "zipcode": "location zipcode as a string or null",
    "seller": "seller name or null",
    "seller_url": "seller profile URL or seller's shop URL or null"
},
"product": {
    "name": "exact product name (should match exactly a known product name)",
    "manufacturer": "manufacturer name",
    "year": "year of release as an integer or null"
}
}

Extract ad information even if you cannot identify the specific pinball machine.
If you cannot identify a pinball machine, set the product field to null.
Only return valid JSON - no additional text or formatting (do not add fenced code blocks)."#;

/// Failure of one extraction call.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("language model call failed: {0}")]
    Provider(String),
    /// The reply did not parse into the required shape. Never coerced to
    /// defaults: a half-parsed reply would persist corrupt price/seller data.
    #[error("malformed model output: {0}")]
    Malformed(String),
}

/// Turns raw ad markdown into structured listing + product fields.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, content: &str) -> Result<ExtractedAd, ExtractError>;
}

pub struct OpenAiExtractor {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OpenAiExtractor {
    pub fn new(
        api_key: String,
        model: String,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing OpenAI model name");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("building OpenAI HTTP client")?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Extractor for OpenAiExtractor {
    async fn extract(&self, content: &str) -> Result<ExtractedAd, ExtractError> {
        let prompt = EXTRACTION_PROMPT.replace("{content}", content);
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.1,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|err| ExtractError::Provider(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ExtractError::Provider(format!(
                "chat completion returned {status}: {detail}"
            )));
        }

        let envelope: ChatResponse = response
            .json()
            .await
            .map_err(|err| ExtractError::Provider(format!("invalid completion payload: {err}")))?;
        let reply = envelope
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if reply.trim().is_empty() {
            return Err(ExtractError::Provider("model returned empty reply".into()));
        }

        debug!(reply_length = reply.len(), "extraction reply received");
        parse_extraction(&reply)
    }
}

/// Parses the model reply into the typed extraction result. Strict on shape:
/// wrong field types fail the whole ad rather than degrade silently.
pub(crate) fn parse_extraction(reply: &str) -> Result<ExtractedAd, ExtractError> {
    let raw: RawExtraction = serde_json::from_str(reply.trim())
        .map_err(|err| ExtractError::Malformed(err.to_string()))?;

    let product = raw.product.and_then(|product| {
        product.name.map(|name| ProductGuess {
            name,
            manufacturer: product.manufacturer,
            year: product.year,
        })
    });

    Ok(ExtractedAd {
        info: AdInfo {
            title: raw.info.title,
            description: raw.info.description,
            amount: raw.info.amount,
            currency: raw.info.currency,
            city: raw.info.city,
            zipcode: raw.info.zipcode,
            seller: raw.info.seller,
            seller_url: raw.info.seller_url,
        },
        product,
    })
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    info: RawInfo,
    #[serde(default)]
    product: Option<RawProduct>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    zipcode: Option<String>,
    #[serde(default)]
    seller: Option<String>,
    #[serde(default)]
    seller_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProduct {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    manufacturer: Option<String>,
    #[serde(default)]
    year: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_extraction_reply() {
        let reply = r#"{
            "info": {
                "title": "Flipper Godzilla Premium",
                "description": "Stern Godzilla pinball machine, great condition",
                "amount": 8500,
                "currency": "EUR",
                "city": "Lyon",
                "zipcode": "69003",
                "seller": "Arcade Dreams",
                "seller_url": "https://www.leboncoin.fr/boutique/arcade-dreams"
            },
            "product": {
                "name": "Godzilla (Premium)",
                "manufacturer": "Stern",
                "year": 2021
            }
        }"#;
        let extracted = parse_extraction(reply).unwrap();
        assert_eq!(extracted.info.amount, Some(8500));
        assert_eq!(extracted.info.seller.as_deref(), Some("Arcade Dreams"));
        let product = extracted.product.unwrap();
        assert_eq!(product.name, "Godzilla (Premium)");
        assert_eq!(product.manufacturer.as_deref(), Some("Stern"));
        assert_eq!(product.year, Some(2021));
    }

    #[test]
    fn null_product_means_no_guess() {
        let reply = r#"{
            "info": { "title": "Aspirateur", "amount": 40, "currency": "EUR" },
            "product": null
        }"#;
        let extracted = parse_extraction(reply).unwrap();
        assert!(extracted.product.is_none());
        assert_eq!(extracted.info.title.as_deref(), Some("Aspirateur"));
    }

    #[test]
    fn product_without_name_means_no_guess() {
        let reply = r#"{
            "info": { "title": "Flipper inconnu" },
            "product": { "name": null, "manufacturer": "Gottlieb" }
        }"#;
        let extracted = parse_extraction(reply).unwrap();
        assert!(extracted.product.is_none());
    }

    #[test]
    fn non_integer_amount_is_malformed() {
        let reply = r#"{
            "info": { "title": "Flipper", "amount": "huit mille" },
            "product": null
        }"#;
        let err = parse_extraction(reply).unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }

    #[test]
    fn prose_reply_is_malformed() {
        let err = parse_extraction("Sorry, I cannot parse this ad.").unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }
}
