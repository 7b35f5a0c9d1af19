use crate::types::*;

/// # Top-P sampling
/// This sampler adds up the token probabilities until the value is
/// greater or equal to `p` and at least `min_keep` tokens have been
/// encountered. The remaining tokens are eliminated.
///
/// **Properties**:
/// - Filters logits
///
/// **Parameters**:
/// - `min_keep`: Minimum number of entries to keep. (default: `1`)
/// - `p`: Target value in `[0, 1]`, `1.0` disables. (default: `1.0`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleTopP {
    pub(crate) p: L,
    pub(crate) min_keep: usize,
}

impl Default for SampleTopP {
    fn default() -> Self {
        Self {
            p: 1f32,
            min_keep: 1,
        }
    }
}

impl SampleTopP {
    pub fn new(p: L, min_keep: usize) -> Result<Self, SamplerError> {
        if !(0f32..=1f32).contains(&p) {
            Err(SamplerError::InvalidConfiguration(format!(
                "top_p has to be a float >= 0 and <= 1, but is {p}"
            )))?
        }
        Ok(Self { p, min_keep })
    }
}

impl Sampler for SampleTopP {
    fn sample<'a>(
        &mut self,
        _res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        use std::ops::ControlFlow::*;

        let Self { p, min_keep } = *self;
        if p >= 1f32 || logits.is_degenerate() {
            return Ok(logits);
        }
        let (indices, probs) = logits.sorted_softmax()?;

        let mut cum_sum = 0f32;
        let last_idx = match probs
            .iter()
            .enumerate()
            .try_fold(probs.len(), |last_idx, (idx, prob)| {
                cum_sum += prob;
                if cum_sum >= p && idx + 1 >= min_keep {
                    return Break(idx + 1);
                }
                Continue(last_idx)
            }) {
            Continue(i) => i,
            Break(i) => i,
        };
        indices.into_iter().skip(last_idx).for_each(|tid| {
            logits.mask(tid);
        });
        Ok(logits)
    }
}
