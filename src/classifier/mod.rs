//! Classification: the gateway contract and its implementations

mod ensemble;
mod gateway;

pub use ensemble::{
    AgentResult, EnsembleClassifier, EnsembleClient, EnsembleResponse, MockEnsembleClient,
};
pub use gateway::{
    classify_with_timeout, validate_candidates, Candidate, ClassifierError, ClassifierGateway,
    DisabledClassifier, GlossaryEntry, MockClassifier,
};
