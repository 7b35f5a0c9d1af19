use std::fmt::Debug;

use rand::{rngs::StdRng, RngCore, SeedableRng};

use crate::types::{SamplerError, TID};

/// Trait for providing per-sequence resources to stages: the token history
/// (prompt plus everything generated so far) and a random source.
///
/// Every sequence in a batch gets its own resources. Stages only ever read
/// the history; the generation loop appends to it between steps.
pub trait HasSamplerResources: Debug {
    /// Allows a stage to mutably access the RNG (if present).
    fn with_rng_mut(&mut self, _fun: &mut dyn FnMut(&mut dyn RngCore)) -> Result<(), SamplerError> {
        Err(SamplerError::MissingResource("rng".to_string()))
    }

    /// Allows a stage to read the token history (if present).
    fn with_last_tokens(&self, _fun: &mut dyn FnMut(&[TID])) -> Result<(), SamplerError> {
        Err(SamplerError::MissingResource("last_tokens".to_string()))
    }

    /// Allows the generation loop to extend the token history (if present).
    fn with_last_tokens_mut(
        &mut self,
        _fun: &mut dyn FnMut(&mut Vec<TID>),
    ) -> Result<(), SamplerError> {
        Err(SamplerError::MissingResource("last_tokens".to_string()))
    }
}

/// For stages that need nothing.
impl HasSamplerResources for () {}

/// Owned resources for one sequence.
pub struct SequenceResources {
    pub(crate) rng: Option<Box<dyn RngCore + Send + Sync>>,
    pub(crate) history: Option<Vec<TID>>,
}

impl Debug for SequenceResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceResources")
            .field("rng", &self.rng.is_some())
            .field("history", &self.history)
            .finish()
    }
}

impl SequenceResources {
    pub fn new(rng: Option<Box<dyn RngCore + Send + Sync>>, history: Option<Vec<TID>>) -> Self {
        Self { rng, history }
    }

    /// Resources with a [StdRng] seeded from `seed` and the given history.
    pub fn seeded(seed: u64, history: Vec<TID>) -> Self {
        Self::new(Some(Box::new(StdRng::seed_from_u64(seed))), Some(history))
    }

    /// Append a sampled token, starting a history if there was none.
    pub fn push_token(&mut self, token_id: TID) {
        self.history.get_or_insert_with(Vec::new).push(token_id)
    }

    pub fn history(&self) -> Option<&[TID]> {
        self.history.as_deref()
    }
}

impl HasSamplerResources for SequenceResources {
    fn with_rng_mut(&mut self, fun: &mut dyn FnMut(&mut dyn RngCore)) -> Result<(), SamplerError> {
        let rng = self
            .rng
            .as_mut()
            .ok_or_else(|| SamplerError::MissingResource("rng".to_string()))?;
        fun(rng);
        Ok(())
    }

    fn with_last_tokens(&self, fun: &mut dyn FnMut(&[TID])) -> Result<(), SamplerError> {
        let history = self
            .history
            .as_deref()
            .ok_or_else(|| SamplerError::MissingResource("last_tokens".to_string()))?;
        fun(history);
        Ok(())
    }

    fn with_last_tokens_mut(
        &mut self,
        fun: &mut dyn FnMut(&mut Vec<TID>),
    ) -> Result<(), SamplerError> {
        let history = self
            .history
            .as_mut()
            .ok_or_else(|| SamplerError::MissingResource("last_tokens".to_string()))?;
        fun(history);
        Ok(())
    }
}
