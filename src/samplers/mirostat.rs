use tracing::trace;

use crate::{samplers::rand_distrib::SampleRandDistrib, types::*};

/// # Mirostat V2 sampling
/// See: <https://arxiv.org/abs/2007.14966>
///
/// Feedback controlled sampling that aims for a constant average surprise
/// of `tau` bits per token. Candidates whose surprise `-log2(p)` exceeds the
/// running bound `mu` are cut (the most likely candidate always survives),
/// a token is drawn from what is left and `mu` moves by
/// `eta * (observed_surprise - tau)`.
///
/// The stage selects a token itself. Its output is one-hot: every entry but
/// the chosen one is masked, so any later draw has exactly one option.
///
/// The controller state belongs to exactly one sequence. Never share an
/// instance between sequences; [crate::pipeline::BatchPipeline] builds one per
/// sequence.
///
/// **Properties**:
/// - Filters logits
/// - Selects a token
///
/// **Parameters**:
/// - `eta`: Learning rate. (default: `0.1`)
/// - `tau`: Target surprise. (default: `5.0`)
/// - `mu`: Current learning state. Can be set manually after construction. (default: `tau * 2`)
///
/// **Resources**:
/// - `rng`
#[derive(Debug, Clone)]
pub struct SampleMirostat2 {
    pub(crate) tau: L,
    pub(crate) eta: L,
    pub(crate) mu: L,
    pub(crate) error: L,
    pub(crate) token: Option<TID>,
    rd_sampler: SampleRandDistrib,
}

impl Default for SampleMirostat2 {
    fn default() -> Self {
        Self {
            eta: 0.1,
            tau: 5.0,
            mu: 10.0,
            error: 0f32,
            token: None,
            rd_sampler: SampleRandDistrib::new(),
        }
    }
}

impl SampleMirostat2 {
    pub fn new(tau: L, eta: L) -> Result<Self, SamplerError> {
        if !(tau >= 0f32 && tau.is_finite()) {
            Err(SamplerError::InvalidConfiguration(format!(
                "mirostat_tau has to be a non-negative float, but is {tau}"
            )))?
        }
        if !(eta >= 0f32 && eta.is_finite()) {
            Err(SamplerError::InvalidConfiguration(format!(
                "mirostat_eta has to be a non-negative float, but is {eta}"
            )))?
        }
        Ok(Self {
            tau,
            eta,
            mu: tau * 2f32,
            error: 0f32,
            token: None,
            rd_sampler: SampleRandDistrib::new(),
        })
    }

    /// Overrides the learning state.
    pub fn mu(mut self, val: L) -> Self {
        self.mu = val;
        self
    }

    /// Current surprise bound.
    pub fn current_mu(&self) -> L {
        self.mu
    }

    /// `observed_surprise - tau` from the last step.
    pub fn last_error(&self) -> L {
        self.error
    }

    /// Feed one observed surprise into the controller.
    fn update(&mut self, observed_surprise: L) {
        self.error = observed_surprise - self.tau;
        self.mu -= self.eta * self.error;
        trace!(
            surprise = observed_surprise,
            error = self.error,
            mu = self.mu,
            "mirostat update"
        );
    }
}

impl Sampler for SampleMirostat2 {
    fn sample<'a>(
        &mut self,
        res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        self.token = None;
        if logits.is_degenerate() {
            return Ok(logits);
        }

        let mu = self.mu;
        let (indices, probs) = logits.sorted_softmax()?;
        let new_size = probs
            .iter()
            .position(|&p| p > 0f32 && -p.log2() > mu)
            .unwrap_or(probs.len())
            .max(1);
        indices.into_iter().skip(new_size).for_each(|tid| {
            logits.mask(tid);
        });

        let Some(tid) = self.rd_sampler.sample_token(res, logits)? else {
            return Ok(logits);
        };
        // Probability within the truncated, renormalized candidate set.
        let prob = logits.softmax()[tid as usize];
        self.update(-prob.log2());
        logits.keep_only(tid as usize);
        self.token = Some(tid);
        Ok(logits)
    }

    fn sampled_token_id(&self) -> Option<TID> {
        self.token
    }
}
