use crate::types::*;

/// # Top-K sampling
/// Keeps the `k` highest logits (at least `min_keep`). Tokens tied with the
/// `k`-th highest logit are kept as well.
///
/// **Properties**:
/// - Filters logits
///
/// **Parameters**:
/// - `k`: Number of tokens to keep, `0` disables. (default: `0`)
/// - `min_keep`: Minimum number of entries to keep. (default: `1`)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SampleTopK {
    pub(crate) k: usize,
    pub(crate) min_keep: usize,
}

impl SampleTopK {
    pub fn new(k: usize, min_keep: usize) -> Self {
        Self { k, min_keep }
    }
}

impl Sampler for SampleTopK {
    fn sample<'a>(
        &mut self,
        _res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        let k = self.k.max(self.min_keep);
        if self.k == 0 || k >= logits.len() {
            return Ok(logits);
        }
        let indices = logits.sorted_indices()?;
        let cutoff = logits[indices[k - 1]];
        logits
            .iter_mut()
            .filter(|l| **l < cutoff)
            .for_each(|l| *l = L::NEG_INFINITY);
        Ok(logits)
    }
}
