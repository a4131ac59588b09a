//! HTTP narrative collaborator (Gemini `generateContent` API).

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::combine::{NarrativeGenerator, NarrativePayload};
use crate::domain::ClassifierPrediction;
use crate::error::{NarrativeFailure, VulnError};

const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const TEMPERATURE: f64 = 0.3;
const MAX_OUTPUT_TOKENS: u32 = 1500;

const SYSTEM_CONTEXT: &str =
    "You are an expert in social vulnerability analysis and Brazilian public policy.";

/// Connection settings, normally read from the environment (`.env` honoured).
#[derive(Debug, Clone, PartialEq)]
pub struct NarrativeSettings {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub timeout: Duration,
}

impl NarrativeSettings {
    /// `Ok(None)` when `NARRATIVE_API_KEY` is absent: the collaborator is simply not configured.
    pub fn from_env() -> Result<Option<Self>, VulnError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>, VulnError> {
        let api_key = match lookup("NARRATIVE_API_KEY") {
            Some(k) if !k.trim().is_empty() => k.trim().to_string(),
            _ => return Ok(None),
        };

        let timeout_secs = match lookup("NARRATIVE_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                VulnError::validation(
                    "NARRATIVE_TIMEOUT_SECS",
                    format!("expected a whole number of seconds, got '{raw}'"),
                )
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        if timeout_secs == 0 {
            return Err(VulnError::validation("NARRATIVE_TIMEOUT_SECS", "must be > 0"));
        }

        Ok(Some(Self {
            api_key,
            model: lookup("NARRATIVE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            endpoint: lookup("NARRATIVE_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }))
    }
}

pub struct HttpNarrativeClient {
    client: Client,
    settings: NarrativeSettings,
}

impl HttpNarrativeClient {
    pub fn new(settings: NarrativeSettings) -> Result<Self, VulnError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| VulnError::NarrativeUnavailable(NarrativeFailure::Unavailable(e.to_string())))?;
        Ok(Self { client, settings })
    }

    pub fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.endpoint, self.settings.model
        )
    }
}

impl NarrativeGenerator for HttpNarrativeClient {
    fn generate(&self, payload: &NarrativePayload) -> Result<String, NarrativeFailure> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: format!("{SYSTEM_CONTEXT}\n\n{}", build_prompt(payload)),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let resp = self
            .client
            .post(self.url())
            .query(&[("key", self.settings.api_key.as_str())])
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    NarrativeFailure::Timeout
                } else {
                    NarrativeFailure::Unavailable(format!("request failed: {e}"))
                }
            })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(NarrativeFailure::Quota);
        }
        if !status.is_success() {
            return Err(NarrativeFailure::Unavailable(format!("status {status}")));
        }

        let body: GenerateResponse = resp
            .json()
            .map_err(|e| NarrativeFailure::Unavailable(format!("unreadable response: {e}")))?;

        let text = body.text();
        debug!(chars = text.len(), "narrative received");
        if text.trim().is_empty() {
            return Err(NarrativeFailure::Unavailable("empty response".to_string()));
        }
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

fn prediction_line(name: &str, p: &ClassifierPrediction) -> String {
    format!("- {name}: {} (confidence: {:.1}%)\n", p.label, p.confidence() * 100.0)
}

/// Analyst prompt for one household.
pub fn build_prompt(payload: &NarrativePayload) -> String {
    let r = &payload.record;
    let size = r
        .household_size
        .map(|s| s.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let ipc = payload
        .income_per_capita
        .map(|v| format!("R$ {v:.2}"))
        .unwrap_or_else(|| "N/A".to_string());

    let mut prompt = String::new();
    prompt.push_str(
        "Analyse the socio-economic profile below and give a detailed assessment of its social vulnerability.\n\n",
    );
    prompt.push_str("HOUSEHOLD DATA:\n");
    prompt.push_str(&format!("- Age: {} years\n", r.age));
    prompt.push_str(&format!("- Sex: {:?}\n", r.sex));
    prompt.push_str(&format!(
        "- Education: level {} (0=no schooling, 5=higher education)\n",
        r.education
    ));
    prompt.push_str(&format!("- Family income: R$ {:.2}\n", r.family_income));
    prompt.push_str(&format!("- People in household: {size}\n"));
    prompt.push_str(&format!("- Income per capita: {ipc}\n"));
    prompt.push_str(&format!("- Disability: {}\n", yes_no(r.disability)));
    prompt.push_str(&format!(
        "- Employment: {} (0=unemployed, 1=informal, 2=formal)\n",
        r.employment
    ));
    prompt.push_str(&format!(
        "- Housing: {} (1=owned, 2=rented, 3=ceded, 4=occupied)\n",
        r.housing_type.code()
    ));
    prompt.push_str(&format!("- Water access: {}\n", yes_no(r.water_access)));
    prompt.push_str(&format!("- Sewage access: {}\n", yes_no(r.sewage_access)));
    prompt.push_str(&format!("- Receives cash-transfer benefit: {}\n", yes_no(r.benefit)));

    prompt.push_str("\nMACHINE-LEARNING PREDICTIONS:\n");
    prompt.push_str(&prediction_line("Bagging model", &payload.prediction_a));
    prompt.push_str(&prediction_line("Boosting model", &payload.prediction_b));
    if payload.divergent {
        prompt.push_str("The two models disagree; weigh the evidence for each tier explicitly.\n");
    }

    prompt.push_str(
        "\nPlease provide a structured analysis with:\n\
         1. FINAL VULNERABILITY ASSESSMENT: tier (Low/Medium/High/VeryHigh) and justification\n\
         2. RISK FACTORS: the main contributors, most critical first\n\
         3. PROTECTIVE FACTORS: aspects and support that reduce vulnerability\n\
         4. PUBLIC POLICY RECOMMENDATIONS: suitable programmes, priority interventions, medium and long term actions\n\
         5. MONITORING: indicators to follow and a suggested reassessment interval\n\n\
         Be specific and practical, and consider the Brazilian socio-economic context.\n",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::domain::{ModelKind, VulnerabilityLabel};
    use crate::features::engine::tests::reference_record;

    fn payload(divergent: bool) -> NarrativePayload {
        let a = ClassifierPrediction {
            model: ModelKind::Bagging,
            label: VulnerabilityLabel::High,
            probabilities: [0.05, 0.1, 0.6, 0.25],
        };
        let mut b = a.clone();
        b.model = ModelKind::Boosting;
        if divergent {
            b.label = VulnerabilityLabel::VeryHigh;
            b.probabilities = [0.0, 0.05, 0.4, 0.55];
        }
        NarrativePayload {
            record: reference_record(),
            income_per_capita: Some(35.2),
            prediction_a: a,
            prediction_b: b,
            divergent,
        }
    }

    #[test]
    fn prompt_carries_attributes_and_both_predictions() {
        let prompt = build_prompt(&payload(false));
        assert!(prompt.contains("- Age: 28 years"));
        assert!(prompt.contains("Income per capita: R$ 35.20"));
        assert!(prompt.contains("Family income: R$ 176.00"));
        assert!(prompt.contains("Bagging model: High (confidence: 60.0%)"));
        assert!(prompt.contains("Boosting model: High (confidence: 60.0%)"));
        assert!(prompt.contains("MONITORING"));
        assert!(!prompt.contains("disagree"));

        let prompt = build_prompt(&payload(true));
        assert!(prompt.contains("Boosting model: VeryHigh (confidence: 55.0%)"));
        assert!(prompt.contains("disagree"));
    }

    #[test]
    fn settings_require_key_and_apply_defaults() {
        let none = NarrativeSettings::from_lookup(|_| None).unwrap();
        assert!(none.is_none());

        let vars: HashMap<&str, &str> = [
            ("NARRATIVE_API_KEY", " secret "),
            ("NARRATIVE_ENDPOINT", "http://localhost:9999/v1/"),
        ]
        .into_iter()
        .collect();
        let settings = NarrativeSettings::from_lookup(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(settings.api_key, "secret");
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.endpoint, "http://localhost:9999/v1");
        assert_eq!(settings.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn bad_timeout_is_a_validation_error() {
        let vars: HashMap<&str, &str> = [("NARRATIVE_API_KEY", "k"), ("NARRATIVE_TIMEOUT_SECS", "soon")]
            .into_iter()
            .collect();
        let err = NarrativeSettings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap_err();
        assert!(matches!(err, VulnError::Validation { field: "NARRATIVE_TIMEOUT_SECS", .. }));
    }

    #[test]
    fn response_text_joins_parts_of_first_candidate() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"Tier: "},{"text":"High"}]}}]}"#;
        let resp: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.text(), "Tier: High");
        let empty: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.text(), "");
    }

    #[test]
    fn unreachable_endpoint_is_unavailable_not_a_panic() {
        let client = HttpNarrativeClient::new(NarrativeSettings {
            api_key: "k".to_string(),
            model: "m".to_string(),
            endpoint: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(2),
        })
        .unwrap();
        let err = client.generate(&payload(false)).unwrap_err();
        assert!(matches!(
            err,
            NarrativeFailure::Unavailable(_) | NarrativeFailure::Timeout
        ));
    }
}
