use crate::types::*;

/// Floor applied to the entropy and the maximum entropy so the ratio between
/// them is always defined.
const ENTROPY_FLOOR: L = 1e-10;

/// # Dynamic temperature
/// Picks a temperature per step from the entropy of the current
/// distribution. A flat distribution (high entropy) gets a temperature close
/// to `high`, a peaked one gets a temperature close to `low`.
///
/// The temperature is `low + (high - low) * (H / H_max) ^ exponent` where `H`
/// is the entropy of the softmax and `H_max` is the log of the number of
/// unmasked tokens. Probabilities are only computed locally; the stage
/// divides the unscaled logits by that temperature.
///
/// **Properties**:
/// - Modifies logits
///
/// **Parameters**:
/// - `low`: Temperature for a fully peaked distribution. (default: `1.0`)
/// - `high`: Temperature for a uniform distribution. (default: `1.0`)
/// - `exponent`: Shape of the mapping from normalized entropy. (default: `1.0`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleDynamicTemperature {
    pub(crate) low: L,
    pub(crate) high: L,
    pub(crate) exponent: L,
}

impl Default for SampleDynamicTemperature {
    fn default() -> Self {
        Self {
            low: 1f32,
            high: 1f32,
            exponent: 1f32,
        }
    }
}

impl SampleDynamicTemperature {
    pub fn new(low: L, high: L, exponent: L) -> Result<Self, SamplerError> {
        if !(low > 0f32 && high > 0f32 && low.is_finite() && high.is_finite()) {
            Err(SamplerError::InvalidConfiguration(format!(
                "dynatemp_low (={low}) and dynatemp_high (={high}) have to be strictly positive"
            )))?
        }
        if low > high {
            Err(SamplerError::InvalidConfiguration(format!(
                "dynatemp_low (={low}) cannot exceed dynatemp_high (={high})"
            )))?
        }
        if !(exponent > 0f32 && exponent.is_finite()) {
            Err(SamplerError::InvalidConfiguration(format!(
                "dynatemp_exponent has to be strictly positive, but is {exponent}"
            )))?
        }
        Ok(Self {
            low,
            high,
            exponent,
        })
    }

    /// The temperature this stage would apply to `logits`.
    pub fn temperature_for(&self, logits: &Logits) -> L {
        let Self {
            low,
            high,
            exponent,
        } = *self;

        let entropy = -logits
            .softmax()
            .into_iter()
            .filter(|p| *p > 0f32)
            .map(|p| p * p.ln())
            .sum::<L>();
        let entropy = entropy.max(ENTROPY_FLOOR);

        let max_entropy = (logits.finite_count() as L).ln();
        let max_entropy = if max_entropy > 0f32 {
            max_entropy
        } else {
            ENTROPY_FLOOR
        };

        let normalized = entropy / max_entropy;
        low + (high - low) * normalized.powf(exponent)
    }
}

impl Sampler for SampleDynamicTemperature {
    fn sample<'a>(
        &mut self,
        _res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        if logits.is_degenerate() {
            return Ok(logits);
        }
        let dyn_temp = self.temperature_for(logits);
        logits.iter_mut().for_each(|l| *l /= dyn_temp);
        Ok(logits)
    }
}
