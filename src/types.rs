use std::{
    cmp::Ordering,
    fmt::Debug,
    ops::{Deref, DerefMut},
};

use anyhow::Result;
use thiserror::Error;

pub use crate::{chain::*, resource::*};

/// Type for token IDs.
pub type TID = u32;

/// Type for logits.
pub type L = f32;

#[derive(Debug, Error)]
/// Sampler errors
pub enum SamplerError {
    #[error("invalid configuration: {0}")]
    /// A decoding parameter is out of range. Only produced while building
    /// stages or pipelines, never in the middle of a step.
    InvalidConfiguration(String),

    #[error("no finite logits left for sequence {sequence} at step {step}")]
    /// Every entry of the score vector ended up as negative infinity.
    NumericDegeneracy { sequence: usize, step: usize },

    #[error("token id {token_id} is outside the vocabulary (size {n_vocab})")]
    /// A token history referenced an id the score vector has no entry for.
    InvalidToken { token_id: TID, n_vocab: usize },

    #[error("batch has {expected} sequences, but {got} were supplied")]
    /// Per-sequence inputs did not line up with the batch.
    BatchMismatch { expected: usize, got: usize },

    #[error("internal error: {0}")]
    /// General internal error type.
    InternalError(String),

    #[error("missing resource error: {0}")]
    /// Missing resource error type.
    MissingResource(String),

    #[error("logits error: {0}")]
    /// Container for errors that occured while processing logits.
    LogitsError(LogitsError),

    #[error("rand weights error: {0}")]
    /// RNG weights-related errors
    RandWeightedError(rand::distributions::WeightedError),
}

#[derive(Debug, Clone, PartialEq, Error)]
/// Logit errors
pub enum LogitsError {
    #[error("Invalid logit for token id {0}")]
    /// Contains the position (AKA token id) of the offending logit.
    /// Logits cannot be NaN or positive infinity.
    InvalidLogit(usize),

    #[error("expected {expected} logits, got {got}")]
    /// A score vector did not match the vocabulary size seen earlier.
    VocabMismatch { expected: usize, got: usize },

    #[error("internal logits error: {0}")]
    /// General internal error type.
    InternalError(String),
}

impl From<LogitsError> for SamplerError {
    fn from(value: LogitsError) -> Self {
        SamplerError::LogitsError(value)
    }
}

impl From<rand::distributions::WeightedError> for SamplerError {
    fn from(value: rand::distributions::WeightedError) -> Self {
        SamplerError::RandWeightedError(value)
    }
}

/// The score vector for one sequence at one decoding step.
///
/// There is exactly one entry per vocabulary item and the entry at index `i`
/// always belongs to token id `i`. Stages rewrite values in place and exclude
/// tokens by setting them to negative infinity; the vector is never resized or
/// reordered. For convenience this can [Deref] to a slice of the values.
#[derive(Debug, Clone, PartialEq)]
pub struct Logits {
    logits: Vec<L>,
}

impl Deref for Logits {
    type Target = [L];

    fn deref(&self) -> &Self::Target {
        &self.logits
    }
}

impl DerefMut for Logits {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.logits
    }
}

impl Logits {
    /// Make a new [Logits] from an iterator of `L`. We'd like to
    /// write this as [TryFrom] but unfortunately the types make this impossible.
    pub fn try_from_iter<I: IntoIterator<Item = L>>(it: I) -> Result<Self, LogitsError> {
        Ok(Self {
            logits: it
                .into_iter()
                .enumerate()
                .map(|(idx, logit)| {
                    if !is_valid_logit(logit) {
                        Err(LogitsError::InvalidLogit(idx))?
                    }
                    Ok(logit)
                })
                .collect::<Result<Vec<_>, LogitsError>>()?,
        })
    }
}

/// Scores may be finite or negative infinity (masked).
fn is_valid_logit(logit: L) -> bool {
    !logit.is_nan() && logit != L::INFINITY
}

impl TryFrom<Vec<L>> for Logits {
    type Error = LogitsError;

    fn try_from(value: Vec<L>) -> Result<Self, Self::Error> {
        Self::try_from_iter(value)
    }
}

impl Logits {
    /// Number of entries, which is the vocabulary size.
    pub fn n_vocab(&self) -> usize {
        self.logits.len()
    }

    /// Number of entries that can still be sampled.
    pub fn finite_count(&self) -> usize {
        self.logits.iter().filter(|l| l.is_finite()).count()
    }

    /// Position of the first NaN or positive infinity. Stages can produce
    /// these from finite input when a value overflows.
    pub fn first_invalid(&self) -> Option<usize> {
        self.logits.iter().position(|l| !is_valid_logit(*l))
    }

    /// True when nothing is left to sample from.
    pub fn is_degenerate(&self) -> bool {
        self.finite_count() == 0
    }

    /// The largest finite logit, if there is one.
    pub fn max_logit(&self) -> Option<L> {
        self.logits
            .iter()
            .copied()
            .filter(|l| l.is_finite())
            .reduce(L::max)
    }

    /// Exclude a token from sampling.
    pub fn mask(&mut self, token_id: usize) -> &mut Self {
        self.logits[token_id] = L::NEG_INFINITY;
        self
    }

    /// Token ids ordered by descending logit. Ties keep ascending token id
    /// order so the result is deterministic.
    pub fn sorted_indices(&self) -> Result<Vec<usize>> {
        let mut indices = (0..self.logits.len()).collect::<Vec<_>>();
        let mut sort_err = Ok(());
        indices.sort_by(|&a, &b| {
            self.logits[b]
                .partial_cmp(&self.logits[a])
                .unwrap_or_else(|| {
                    sort_err = Err(LogitsError::InternalError(String::from(
                        "Impossible: logit comparison failed?",
                    )));
                    Ordering::Less
                })
        });
        sort_err?;
        Ok(indices)
    }

    /// Applies the softmax function and returns the probabilities indexed by
    /// token id. The logits themselves are left untouched. Masked entries get
    /// probability zero; if every entry is masked the result is all zeros.
    pub fn softmax(&self) -> Vec<L> {
        let Some(max_l) = self.max_logit() else {
            return vec![0f32; self.logits.len()];
        };
        let mut probs = self
            .logits
            .iter()
            .map(|l| (l - max_l).exp())
            .collect::<Vec<_>>();
        let cum_sum = probs.iter().sum::<L>();
        probs.iter_mut().for_each(|p| *p /= cum_sum);
        probs
    }

    /// Descending token order together with the softmax probabilities in
    /// that same order.
    pub fn sorted_softmax(&self) -> Result<(Vec<usize>, Vec<L>)> {
        let indices = self.sorted_indices()?;
        let probs = self.softmax();
        let sorted = indices.iter().map(|&idx| probs[idx]).collect();
        Ok((indices, sorted))
    }

    /// Mask every token except `token_id`.
    pub fn keep_only(&mut self, token_id: usize) -> &mut Self {
        self.logits
            .iter_mut()
            .enumerate()
            .filter(|(idx, _)| *idx != token_id)
            .for_each(|(_, l)| *l = L::NEG_INFINITY);
        self
    }

    /// Convenience method
    pub fn sample<S: Sampler>(
        &mut self,
        res: &mut dyn HasSamplerResources,
        sampler: &mut S,
    ) -> Result<&mut Self> {
        sampler.sample(res, self)
    }

    /// Convenience method
    pub fn sample_token<S: Sampler>(
        &mut self,
        res: &mut dyn HasSamplerResources,
        sampler: &mut S,
    ) -> Result<Option<TID>> {
        sampler.sample_token(res, self)
    }
}

/// The main sampler trait. Every pipeline stage implements it.
pub trait Sampler: Debug + Send + Sync {
    /// Runs the [Sampler]. Depending on the type of [Sampler], this may produce a token id.
    fn sample<'a>(
        &mut self,
        res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> Result<&'a mut Logits>;

    /// Returns the last sampled token id if available.
    ///
    /// A default implemenation is provided which simply returns [None].
    fn sampled_token_id(&self) -> Option<TID> {
        None
    }

    /// Run the sampler and return the last sampled token id if available.
    ///
    /// A default implementation is provided which just calls [Sampler::sample] followed by
    /// [Sampler::sampled_token_id()].
    fn sample_token(
        &mut self,
        res: &mut dyn HasSamplerResources,
        logits: &mut Logits,
    ) -> Result<Option<TID>> {
        let _ = self.sample(res, logits)?;
        Ok(self.sampled_token_id())
    }
}

impl Sampler for Box<dyn Sampler> {
    fn sampled_token_id(&self) -> Option<TID> {
        (**self).sampled_token_id()
    }

    fn sample_token(
        &mut self,
        res: &mut dyn HasSamplerResources,
        logits: &mut Logits,
    ) -> Result<Option<TID>> {
        (**self).sample_token(res, logits)
    }

    fn sample<'a>(
        &mut self,
        res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> Result<&'a mut Logits> {
        (**self).sample(res, logits)
    }
}
