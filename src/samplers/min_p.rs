use crate::types::*;

/// # Min-P sampling
/// This sampler prunes tokens that don't meet a certain percentage
/// of the most probable token. For example if `p` is `0.05` then
/// after `min_keep` is satisfied, other tokens must be at least 5%
/// of the most probable token.
///
/// Credit to @kalomaze on GitHub for design. See this link for a more in-depth
/// explanation: https://github.com/ggerganov/llama.cpp/issues/3483#issuecomment-1783920998
///
/// **Properties**:
/// - Filters logits
///
/// **Parameters**:
/// - `min_keep`: Minimum number of entries to keep. (default: `1`)
/// - `p`: Threshold value in `[0, 1]`. Use `0.0` to disable. (default: `0.05`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleMinP {
    pub(crate) p: L,
    pub(crate) min_keep: usize,
}

impl Default for SampleMinP {
    fn default() -> Self {
        Self {
            p: 0.05f32,
            min_keep: 1,
        }
    }
}

impl SampleMinP {
    pub fn new(p: L, min_keep: usize) -> Result<Self, SamplerError> {
        if !(0f32..=1f32).contains(&p) {
            Err(SamplerError::InvalidConfiguration(format!(
                "min_p has to be a float >= 0 and <= 1, but is {p}"
            )))?
        }
        Ok(Self { p, min_keep })
    }

    pub fn min_keep(mut self, val: usize) -> Self {
        self.min_keep = val;
        self
    }
}

impl Sampler for SampleMinP {
    fn sample<'a>(
        &mut self,
        _res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        let Self { p, min_keep } = *self;
        if p == 0f32 || logits.is_degenerate() {
            return Ok(logits);
        }

        let (indices, probs) = logits.sorted_softmax()?;
        let threshold = probs[0] * p;
        indices
            .into_iter()
            .zip(probs)
            .skip(min_keep)
            .filter(|(_, prob)| *prob < threshold)
            .for_each(|(tid, _)| {
                logits.mask(tid);
            });
        Ok(logits)
    }
}
