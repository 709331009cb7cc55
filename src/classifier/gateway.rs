//! ClassifierGateway contract and boundary validation
//!
//! The classifier is an untrusted, fallible, latent dependency. Its output is
//! validated against the glossary that was sent before it enters the core.

use crate::model::TagId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// A glossary entry as sent to the classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub id: TagId,
    pub name: String,
}

impl GlossaryEntry {
    pub fn new(id: TagId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A (tag, confidence) pair proposed by the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub tag_id: TagId,
    pub name: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Candidate {
    pub fn new(tag_id: TagId, name: impl Into<String>, confidence: f64) -> Self {
        Self {
            tag_id,
            name: name.into(),
            confidence,
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// Errors from classifier calls. All of them are transient from the core's
/// point of view: nothing is applied and nothing is retried.
#[derive(Debug, Clone, Error)]
pub enum ClassifierError {
    #[error("classifier not available: {0}")]
    Unavailable(String),
    #[error("classification failed: {0}")]
    InvocationFailed(String),
    #[error("classifier response parse error: {0}")]
    ParseError(String),
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),
}

/// Contract to the external text-classification service.
#[async_trait]
pub trait ClassifierGateway: Send + Sync {
    /// Propose tags for `text` drawn from `glossary`.
    ///
    /// An empty result is valid. Implementations should only return ids
    /// present in the glossary; callers still validate.
    async fn classify(
        &self,
        text: &str,
        glossary: &[GlossaryEntry],
    ) -> Result<Vec<Candidate>, ClassifierError>;
}

/// Call the classifier with a bounded timeout. Expiry is a classifier failure.
pub async fn classify_with_timeout(
    gateway: &dyn ClassifierGateway,
    text: &str,
    glossary: &[GlossaryEntry],
    timeout: Duration,
) -> Result<Vec<Candidate>, ClassifierError> {
    match tokio::time::timeout(timeout, gateway.classify(text, glossary)).await {
        Ok(result) => result,
        Err(_) => Err(ClassifierError::Timeout(timeout)),
    }
}

/// Filter raw classifier output down to usable candidates.
///
/// - ids not present in the glossary are dropped;
/// - NaN or out-of-range confidences are dropped;
/// - duplicate ids keep the highest confidence;
/// - names are taken from the glossary, not from the response.
///
/// Output preserves first-seen order.
pub fn validate_candidates(raw: Vec<Candidate>, glossary: &[GlossaryEntry]) -> Vec<Candidate> {
    let names: HashMap<&TagId, &str> = glossary.iter().map(|e| (&e.id, e.name.as_str())).collect();
    let mut out: Vec<Candidate> = Vec::with_capacity(raw.len());
    let mut seen: HashSet<TagId> = HashSet::new();

    for candidate in raw {
        let Some(name) = names.get(&candidate.tag_id) else {
            tracing::warn!(tag_id = %candidate.tag_id, "classifier returned a tag outside the glossary");
            continue;
        };
        if !(0.0..=1.0).contains(&candidate.confidence) {
            tracing::warn!(
                tag_id = %candidate.tag_id,
                confidence = candidate.confidence,
                "classifier returned an out-of-range confidence"
            );
            continue;
        }
        if !seen.insert(candidate.tag_id.clone()) {
            if let Some(existing) = out.iter_mut().find(|c| c.tag_id == candidate.tag_id) {
                if candidate.confidence > existing.confidence {
                    existing.confidence = candidate.confidence;
                    existing.reasoning = candidate.reasoning;
                }
            }
            continue;
        }
        out.push(Candidate {
            name: name.to_string(),
            ..candidate
        });
    }
    out
}

/// Classifier that is never reachable. Used when no classification service is
/// configured; every call fails with `Unavailable`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledClassifier;

#[async_trait]
impl ClassifierGateway for DisabledClassifier {
    async fn classify(
        &self,
        _text: &str,
        _glossary: &[GlossaryEntry],
    ) -> Result<Vec<Candidate>, ClassifierError> {
        Err(ClassifierError::Unavailable(
            "no classifier configured".to_string(),
        ))
    }
}

/// Scripted classifier for testing.
///
/// Responses are consumed in order; once the script runs out the fallback
/// response is returned for every call.
pub struct MockClassifier {
    script: Mutex<Vec<Result<Vec<Candidate>, ClassifierError>>>,
    fallback: Result<Vec<Candidate>, ClassifierError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockClassifier {
    /// Always return the given candidates
    pub fn returning(candidates: Vec<Candidate>) -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            fallback: Ok(candidates),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fail with the given error
    pub fn failing(error: ClassifierError) -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            fallback: Err(error),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue a one-off response ahead of the fallback
    pub fn then(self, response: Result<Vec<Candidate>, ClassifierError>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(response);
        self
    }

    /// Sleep before answering (exercises timeouts)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of classify calls received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassifierGateway for MockClassifier {
    async fn classify(
        &self,
        _text: &str,
        _glossary: &[GlossaryEntry],
    ) -> Result<Vec<Candidate>, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = {
            let mut script = self
                .script
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}
