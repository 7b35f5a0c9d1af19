use crate::types::*;

/// # Top-A sampling
/// This sampler prunes tokens that don't meet a threshold based
/// on the most probable token. The threshold is `a * max_prob^2`, so a
/// confident distribution prunes much more aggressively than a flat one.
///
/// Credit to @BlinkDL on GitHub for design. See this link for a more in-depth
/// explanation: https://github.com/BlinkDL/RWKV-LM#the-top-a-sampling-method
///
/// **Properties**:
/// - Filters logits
///
/// **Parameters**:
/// - `min_keep`: Minimum number of entries to keep. (default: `1`)
/// - `a`: Threshold scale in `[0, 1]`. Use `0.0` to disable. (default: `0.2`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleTopA {
    pub(crate) a: L,
    pub(crate) min_keep: usize,
}

impl Default for SampleTopA {
    fn default() -> Self {
        Self {
            a: 0.2,
            min_keep: 1,
        }
    }
}

impl SampleTopA {
    pub fn new(a: L, min_keep: usize) -> Result<Self, SamplerError> {
        if !(0f32..=1f32).contains(&a) {
            Err(SamplerError::InvalidConfiguration(format!(
                "top_a has to be a float >= 0 and <= 1, but is {a}"
            )))?
        }
        Ok(Self { a, min_keep })
    }

    pub fn min_keep(mut self, val: usize) -> Self {
        self.min_keep = val;
        self
    }
}

impl Sampler for SampleTopA {
    fn sample<'a>(
        &mut self,
        _res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        let Self { a, min_keep } = *self;
        if a == 0f32 || logits.is_degenerate() {
            return Ok(logits);
        }

        let (indices, probs) = logits.sorted_softmax()?;
        let threshold = probs[0].powi(2) * a;
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
