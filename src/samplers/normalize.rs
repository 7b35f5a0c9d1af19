use crate::types::*;

/// # Logit normalization
/// Replaces the logits with log-probabilities (log-softmax over the unmasked
/// entries). The resulting distribution is unchanged; only the offset is.
///
/// **Properties**:
/// - Modifies logits
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SampleNormalize;

impl SampleNormalize {
    pub fn new() -> Self {
        Self
    }
}

impl Sampler for SampleNormalize {
    fn sample<'a>(
        &mut self,
        _res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        let Some(max_l) = logits.max_logit() else {
            return Ok(logits);
        };
        let log_sum = logits
            .iter()
            .map(|l| (l - max_l).exp())
            .sum::<L>()
            .ln()
            + max_l;
        logits.iter_mut().for_each(|l| *l -= log_sum);
        Ok(logits)
    }
}
