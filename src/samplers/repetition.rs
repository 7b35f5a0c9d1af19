use std::collections::HashMap;

use crate::types::*;

/// # Repetition, presence and frequency penalties
/// Looks at the last `last_n` tokens of the history (`0` means the whole
/// history) and, for every distinct token id found there:
///
/// - applies the multiplicative **repetition** penalty once: negative logits
///   are multiplied by `penalty`, others divided by it, so the logit always
///   moves toward lower likelihood;
/// - subtracts the **presence** penalty once;
/// - subtracts the **frequency** penalty once per occurrence. If token id `3`
///   appeared 3 times and `frequency_penalty` is `0.05`, its logit drops by
///   `0.15`.
///
/// The stage works on raw logits and runs before any of the distribution
/// shaping stages.
///
/// **Properties**:
/// - Modifies logits
///
/// **Parameters**:
/// - `penalty`: Repetition penalty, must be `> 0`. `1.0` disables. (default: `1.0`)
/// - `presence_penalty`: (default: `0.0`)
/// - `frequency_penalty`: (default: `0.0`)
/// - `last_n`: Number of last tokens to consider, `0` for all. (default: `0`)
///
/// **Resources**:
/// - `last_tokens`
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRepetition {
    pub(crate) penalty: L,
    pub(crate) presence_penalty: L,
    pub(crate) frequency_penalty: L,
    pub(crate) last_n: usize,
}

impl Default for SampleRepetition {
    fn default() -> Self {
        Self {
            penalty: 1f32,
            presence_penalty: 0f32,
            frequency_penalty: 0f32,
            last_n: 0,
        }
    }
}

impl SampleRepetition {
    pub fn new(
        penalty: L,
        presence_penalty: L,
        frequency_penalty: L,
        last_n: usize,
    ) -> Result<Self, SamplerError> {
        if !(penalty > 0f32 && penalty.is_finite()) {
            Err(SamplerError::InvalidConfiguration(format!(
                "repetition_penalty has to be strictly positive, but is {penalty}"
            )))?
        }
        if !(presence_penalty.is_finite() && frequency_penalty.is_finite()) {
            Err(SamplerError::InvalidConfiguration(format!(
                "presence_penalty (={presence_penalty}) and frequency_penalty \
                 (={frequency_penalty}) have to be finite"
            )))?
        }
        Ok(Self {
            penalty,
            presence_penalty,
            frequency_penalty,
            last_n,
        })
    }

    /// Whether the stage would change anything at all.
    pub fn is_active(&self) -> bool {
        self.penalty > 1f32 || self.presence_penalty != 0f32 || self.frequency_penalty != 0f32
    }

    fn window<'t>(&self, tokens: &'t [TID]) -> &'t [TID] {
        if self.last_n == 0 || self.last_n > tokens.len() {
            tokens
        } else {
            &tokens[tokens.len() - self.last_n..]
        }
    }
}

impl Sampler for SampleRepetition {
    fn sample<'a>(
        &mut self,
        res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        let Self {
            penalty,
            presence_penalty,
            frequency_penalty,
            ..
        } = *self;

        if logits.is_empty() || !self.is_active() {
            return Ok(logits);
        }

        let mut counts = HashMap::<TID, usize>::default();
        res.with_last_tokens(&mut |tokens| {
            let tokens = self.window(tokens);
            counts.reserve(tokens.len());
            tokens
                .iter()
                .for_each(|&tid| *counts.entry(tid).or_insert(0) += 1);
        })?;

        let n_vocab = logits.n_vocab();
        if let Some(&token_id) = counts.keys().find(|&&tid| tid as usize >= n_vocab) {
            Err(SamplerError::InvalidToken { token_id, n_vocab })?
        }

        counts.into_iter().for_each(|(tid, cnt)| {
            let l = &mut logits[tid as usize];
            *l = if *l < 0f32 { *l * penalty } else { *l / penalty };
            *l -= presence_penalty + cnt as L * frequency_penalty;
        });
        Ok(logits)
    }
}
