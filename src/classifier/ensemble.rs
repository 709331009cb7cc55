//! LLM ensemble classifier
//!
//! `EnsembleClassifier` implements [`ClassifierGateway`] on top of an
//! [`EnsembleClient`], the transport-agnostic interface to an LLM
//! orchestration service that runs named ensembles of agents. The classifier:
//! 1. serializes the text and glossary as the ensemble input
//! 2. invokes the configured ensemble
//! 3. extracts JSON from the final agent's response
//! 4. decodes it through a typed schema into candidates

use super::gateway::{Candidate, ClassifierError, ClassifierGateway, GlossaryEntry};
use crate::config::ClassifierConfig;
use crate::model::TagId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Result of invoking an ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleResponse {
    /// Per-agent results, keyed by agent name
    pub results: BTreeMap<String, AgentResult>,
    /// Overall execution status
    pub status: String,
}

impl EnsembleResponse {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    pub fn is_failed(&self) -> bool {
        self.status == "failed"
    }

    /// The structured output when no output agent is named.
    ///
    /// `results` is keyed by agent name, so this is the successful agent
    /// whose name sorts last, not the one that ran last. Ensembles with more
    /// than one answering agent should name theirs via [`Self::response_from`].
    pub fn final_response(&self) -> Option<&str> {
        self.results
            .values()
            .filter(|r| r.is_success())
            .filter_map(|r| r.response.as_deref())
            .last()
    }

    /// Response of the named agent, if it succeeded
    pub fn response_from(&self, agent: &str) -> Option<&str> {
        self.results
            .get(agent)
            .filter(|r| r.is_success())
            .and_then(|r| r.response.as_deref())
    }
}

/// Result from a single agent in an ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AgentResult {
    pub fn success(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            status: Some("success".to_string()),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

/// Transport to an ensemble-running service (subprocess, HTTP, mock).
#[async_trait]
pub trait EnsembleClient: Send + Sync {
    async fn is_available(&self) -> bool;

    async fn invoke(
        &self,
        ensemble_name: &str,
        input_data: &str,
    ) -> Result<EnsembleResponse, ClassifierError>;
}

/// Ensemble client that answers every invocation with a fixed response and
/// records the inputs it received.
pub struct MockEnsembleClient {
    available: bool,
    response: Result<EnsembleResponse, ClassifierError>,
    inputs: Mutex<Vec<String>>,
}

impl MockEnsembleClient {
    /// An available client whose single agent answers with `text`
    pub fn answering(text: impl Into<String>) -> Self {
        let mut results = BTreeMap::new();
        results.insert("tagger".to_string(), AgentResult::success(text));
        Self {
            available: true,
            response: Ok(EnsembleResponse {
                results,
                status: "completed".to_string(),
            }),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_response(response: EnsembleResponse) -> Self {
        Self {
            available: true,
            response: Ok(response),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            response: Err(ClassifierError::Unavailable(
                "mock ensemble client configured as unavailable".to_string(),
            )),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Inputs received so far, in call order
    pub fn inputs(&self) -> Vec<String> {
        self.inputs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EnsembleClient for MockEnsembleClient {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn invoke(
        &self,
        _ensemble_name: &str,
        input_data: &str,
    ) -> Result<EnsembleResponse, ClassifierError> {
        self.inputs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(input_data.to_string());
        self.response.clone()
    }
}

/// Typed schema of the classification payload the ensemble must produce:
///
/// ```json
/// { "tags": [ { "id": "…", "name": "Work", "confidence": 0.8, "reasoning": "…" } ] }
/// ```
#[derive(Debug, Deserialize)]
struct ClassificationPayload {
    #[serde(default)]
    tags: Vec<PayloadTag>,
}

#[derive(Debug, Deserialize)]
struct PayloadTag {
    id: String,
    #[serde(default)]
    name: Option<String>,
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Classifier backed by an LLM ensemble.
pub struct EnsembleClassifier {
    client: Arc<dyn EnsembleClient>,
    ensemble_name: String,
    /// Agent whose response carries the classification
    output_agent: Option<String>,
}

impl EnsembleClassifier {
    pub fn new(client: Arc<dyn EnsembleClient>, ensemble_name: impl Into<String>) -> Self {
        Self {
            client,
            ensemble_name: ensemble_name.into(),
            output_agent: None,
        }
    }

    pub fn from_config(client: Arc<dyn EnsembleClient>, config: &ClassifierConfig) -> Self {
        Self {
            client,
            ensemble_name: config.ensemble.clone(),
            output_agent: config.output_agent.clone(),
        }
    }

    pub fn with_output_agent(mut self, agent: impl Into<String>) -> Self {
        self.output_agent = Some(agent.into());
        self
    }

    fn build_input(text: &str, glossary: &[GlossaryEntry]) -> Result<String, ClassifierError> {
        let payload = serde_json::json!({
            "text": text,
            "glossary": glossary,
        });
        serde_json::to_string(&payload).map_err(|e| ClassifierError::ParseError(e.to_string()))
    }

    fn parse_response(response_text: &str) -> Result<Vec<Candidate>, ClassifierError> {
        let value = extract_json(response_text).ok_or_else(|| {
            let preview: String = response_text.chars().take(200).collect();
            ClassifierError::ParseError(format!("no JSON object in ensemble response: {}", preview))
        })?;
        let payload: ClassificationPayload = serde_json::from_value(value)
            .map_err(|e| ClassifierError::ParseError(e.to_string()))?;

        Ok(payload
            .tags
            .into_iter()
            .map(|t| Candidate {
                tag_id: TagId::from_string(t.id),
                name: t.name.unwrap_or_default(),
                confidence: t.confidence,
                reasoning: t.reasoning,
            })
            .collect())
    }
}

#[async_trait]
impl ClassifierGateway for EnsembleClassifier {
    async fn classify(
        &self,
        text: &str,
        glossary: &[GlossaryEntry],
    ) -> Result<Vec<Candidate>, ClassifierError> {
        if glossary.is_empty() {
            return Ok(Vec::new());
        }
        if !self.client.is_available().await {
            return Err(ClassifierError::Unavailable(format!(
                "ensemble '{}' unreachable",
                self.ensemble_name
            )));
        }

        let input = Self::build_input(text, glossary)?;
        let response = self.client.invoke(&self.ensemble_name, &input).await?;
        if response.is_failed() {
            return Err(ClassifierError::InvocationFailed(format!(
                "ensemble '{}' execution failed",
                self.ensemble_name
            )));
        }

        let response_text = match &self.output_agent {
            Some(agent) => response.response_from(agent).ok_or_else(|| {
                ClassifierError::InvocationFailed(format!(
                    "agent '{}' gave no successful response",
                    agent
                ))
            })?,
            None => response.final_response().ok_or_else(|| {
                ClassifierError::InvocationFailed(
                    "no agent responses in ensemble result".to_string(),
                )
            })?,
        };
        let candidates = Self::parse_response(response_text)?;
        tracing::debug!(
            ensemble = %self.ensemble_name,
            candidates = candidates.len(),
            "ensemble classification parsed"
        );
        Ok(candidates)
    }
}

/// Extract a JSON object from LLM response text.
///
/// Tries, in order: the whole text, a fenced code block, and the span from
/// the first `{` to the last `}`.
pub(crate) fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();

    let as_object = |s: &str| {
        serde_json::from_str::<serde_json::Value>(s)
            .ok()
            .filter(serde_json::Value::is_object)
    };

    if let Some(v) = as_object(trimmed) {
        return Some(v);
    }

    let fenced = if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + "```json".len()..];
        after.find("```").map(|end| &after[..end])
    } else if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        after.find("```").map(|end| &after[..end])
    } else {
        None
    };
    if let Some(v) = fenced.and_then(|block| as_object(block.trim())) {
        return Some(v);
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => as_object(&trimmed[start..=end]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glossary() -> Vec<GlossaryEntry> {
        vec![
            GlossaryEntry::new(TagId::from_string("g1"), "Work"),
            GlossaryEntry::new(TagId::from_string("g2"), "Family"),
        ]
    }

    #[test]
    fn extracts_plain_fenced_and_embedded_json() {
        assert!(extract_json(r#"{"tags": []}"#).is_some());
        assert!(extract_json("Here:\n```json\n{\"tags\": []}\n```\nDone").is_some());
        assert!(extract_json("I think {\"tags\": []} fits").is_some());
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("[1, 2]").is_none());
    }

    #[tokio::test]
    async fn classifies_via_final_agent_response() {
        let client = Arc::new(MockEnsembleClient::answering(
            r#"```json
            {"tags": [{"id": "g1", "name": "Work", "confidence": 0.8, "reasoning": "office"}]}
            ```"#,
        ));
        let classifier = EnsembleClassifier::new(client.clone(), "text-tagger");

        let out = classifier.classify("meeting at nine", &glossary()).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tag_id.as_str(), "g1");
        assert_eq!(out[0].confidence, 0.8);
        assert_eq!(out[0].reasoning.as_deref(), Some("office"));

        let sent: serde_json::Value = serde_json::from_str(&client.inputs()[0]).unwrap();
        assert_eq!(sent["text"], "meeting at nine");
        assert_eq!(sent["glossary"].as_array().unwrap().len(), 2);
    }

    fn two_agent_response() -> EnsembleResponse {
        let mut results = BTreeMap::new();
        results.insert(
            "classifier".to_string(),
            AgentResult::success(r#"{"tags": [{"id": "g1", "confidence": 0.7}]}"#),
        );
        results.insert("critic".to_string(), AgentResult::success("looks fine"));
        EnsembleResponse {
            results,
            status: "completed".to_string(),
        }
    }

    #[test]
    fn final_response_is_last_by_agent_name() {
        let response = two_agent_response();
        assert_eq!(response.final_response(), Some("looks fine"));
        assert!(response.response_from("classifier").unwrap().contains("g1"));
        assert!(response.response_from("missing").is_none());
    }

    #[tokio::test]
    async fn named_output_agent_is_read_regardless_of_order() {
        let client = Arc::new(MockEnsembleClient::with_response(two_agent_response()));
        let config = ClassifierConfig {
            output_agent: Some("classifier".to_string()),
            ..ClassifierConfig::default()
        };
        let classifier = EnsembleClassifier::from_config(client, &config);

        let out = classifier.classify("memo", &glossary()).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tag_id.as_str(), "g1");

        let missing = EnsembleClassifier::new(
            Arc::new(MockEnsembleClient::with_response(two_agent_response())),
            "text-tagger",
        )
        .with_output_agent("summarizer");
        let err = missing.classify("memo", &glossary()).await.unwrap_err();
        assert!(matches!(err, ClassifierError::InvocationFailed(_)));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_parse_error() {
        let client = Arc::new(MockEnsembleClient::answering(r#"{"tags": [{"id": 5}]}"#));
        let classifier = EnsembleClassifier::new(client, "text-tagger");

        let err = classifier.classify("x", &glossary()).await.unwrap_err();
        assert!(matches!(err, ClassifierError::ParseError(_)));
    }

    #[tokio::test]
    async fn unavailable_client_is_reported() {
        let classifier =
            EnsembleClassifier::new(Arc::new(MockEnsembleClient::unavailable()), "text-tagger");
        let err = classifier.classify("x", &glossary()).await.unwrap_err();
        assert!(matches!(err, ClassifierError::Unavailable(_)));
    }

    #[tokio::test]
    async fn empty_glossary_short_circuits() {
        let client = Arc::new(MockEnsembleClient::answering("{}"));
        let classifier = EnsembleClassifier::new(client.clone(), "text-tagger");
        assert!(classifier.classify("x", &[]).await.unwrap().is_empty());
        assert!(client.inputs().is_empty());
    }
}
