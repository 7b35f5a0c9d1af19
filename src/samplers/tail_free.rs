use crate::types::*;

/// # Tail free sampling
/// An approach to sampling that attempts to outperform existing
/// nucleus (top-p and top-k) methods.
/// See: <https://trentbrick.github.io/Tail-Free-Sampling/>
///
/// The absolute second derivative of the descending probability curve is
/// normalized to sum to one and accumulated. Ranks whose accumulated value
/// exceeds `z` are removed. The curve never removes the first rank and always
/// removes the last one.
///
/// **Properties**:
/// - Filters logits
///
/// **Parameters**:
/// - `min_keep`: Minimum number of entries to keep. Setting this to `0` is not recommended. (default: `1`)
/// - `z`: The z parameter in `[0, 1]`. `1.0` disables the sampler. (default: `1.0`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleTailFree {
    pub(crate) z: L,
    pub(crate) min_keep: usize,
}

impl Default for SampleTailFree {
    fn default() -> Self {
        Self {
            z: 1f32,
            min_keep: 1,
        }
    }
}

impl SampleTailFree {
    pub fn new(z: L, min_keep: usize) -> Result<Self, SamplerError> {
        if !(0f32..=1f32).contains(&z) {
            Err(SamplerError::InvalidConfiguration(format!(
                "tfs has to be a float >= 0 and <= 1, but is {z}"
            )))?
        }
        Ok(Self { z, min_keep })
    }

    pub fn min_keep(mut self, val: usize) -> Self {
        self.min_keep = val;
        self
    }
}

impl Sampler for SampleTailFree {
    fn sample<'a>(
        &mut self,
        _res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        let Self { z, min_keep } = *self;

        if z >= 1f32 || logits.len() < 2 || logits.is_degenerate() {
            return Ok(logits);
        }

        // Masked entries take part with probability zero so the curve always
        // spans the whole vocabulary.
        let (indices, probs) = logits.sorted_softmax()?;

        let fderivs = probs.windows(2).map(|w| w[1] - w[0]).collect::<Vec<_>>();
        let sderivs = fderivs
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .collect::<Vec<_>>();
        let ssum = sderivs.iter().sum::<L>();

        let mut cum_sum = 0f32;
        let mut remove = Vec::with_capacity(indices.len());
        remove.push(false);
        sderivs.into_iter().for_each(|d| {
            cum_sum += d / ssum;
            remove.push(cum_sum > z);
        });
        remove.push(true);

        indices
            .into_iter()
            .zip(remove)
            .enumerate()
            .filter(|(rank, (_, rm))| *rm && *rank >= min_keep)
            .for_each(|(_, (tid, _))| {
                logits.mask(tid);
            });
        Ok(logits)
    }
}
