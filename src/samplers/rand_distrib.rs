use rand::distributions::{Distribution, WeightedIndex};

use crate::types::*;

/// # Random distribution sampling
/// Selects a token at random, weighted by the softmax of the unmasked logits.
/// The logits are not modified.
///
/// **Properties**:
/// - Selects a token
///
/// **Parameters**:
/// - (none)
///
/// **Resources**:
/// - `rng`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SampleRandDistrib {
    token_id: Option<TID>,
}

impl SampleRandDistrib {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Sampler for SampleRandDistrib {
    fn sample<'a>(
        &mut self,
        res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        self.token_id = None;
        if logits.is_degenerate() {
            return Ok(logits);
        }

        let dist = WeightedIndex::new(logits.softmax()).map_err(SamplerError::from)?;
        let mut choice = None;
        res.with_rng_mut(&mut |rng| choice = Some(dist.sample(rng)))?;
        let choice = choice.ok_or_else(|| {
            SamplerError::InternalError(String::from("Impossible: rng callback never ran?"))
        })?;
        self.token_id = Some(TID::try_from(choice)?);
        Ok(logits)
    }

    fn sampled_token_id(&self) -> Option<TID> {
        self.token_id
    }
}
