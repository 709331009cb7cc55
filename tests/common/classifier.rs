//! Seeded classifier that proposes random subsets of the glossary

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};
use tagkeep::{Candidate, ClassifierError, ClassifierGateway, GlossaryEntry, TagId};

pub struct RandomClassifier {
    rng: Mutex<StdRng>,
}

impl RandomClassifier {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl ClassifierGateway for RandomClassifier {
    async fn classify(
        &self,
        _text: &str,
        glossary: &[GlossaryEntry],
    ) -> Result<Vec<Candidate>, ClassifierError> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        if rng.gen_bool(0.1) {
            return Err(ClassifierError::Unavailable("random outage".into()));
        }
        let mut out = Vec::new();
        for entry in glossary {
            if rng.gen_bool(0.4) {
                out.push(Candidate::new(
                    entry.id.clone(),
                    entry.name.clone(),
                    rng.gen_range(0.0..=1.0),
                ));
            }
        }
        // Occasionally hallucinate a tag outside the glossary
        if rng.gen_bool(0.1) {
            out.push(Candidate::new(TagId::new(), "made-up", 0.9));
        }
        Ok(out)
    }
}
