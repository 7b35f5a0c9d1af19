use crate::types::*;

/// # Temperature sampling
/// Divides every logit by `temperature`. Values below `1.0` sharpen the
/// distribution, values above flatten it. Masked entries stay masked.
///
/// **Properties**:
/// - Modifies logits
///
/// **Parameters**:
/// - `temperature`: Must be finite and strictly positive. (default: `1.0`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleTemperature {
    pub(crate) temperature: L,
}

impl Default for SampleTemperature {
    fn default() -> Self {
        Self { temperature: 1f32 }
    }
}

impl SampleTemperature {
    /// A temperature of `0` is rejected, it does not mean greedy decoding.
    pub fn new(temperature: L) -> Result<Self, SamplerError> {
        if temperature == 0f32 {
            Err(SamplerError::InvalidConfiguration(String::from(
                "temperature is 0; use greedy (arg-max) selection instead of sampling",
            )))?
        }
        if !(temperature > 0f32 && temperature.is_finite()) {
            Err(SamplerError::InvalidConfiguration(format!(
                "temperature has to be a strictly positive float, but is {temperature}"
            )))?
        }
        Ok(Self { temperature })
    }

    pub fn temperature(&self) -> L {
        self.temperature
    }
}

impl Sampler for SampleTemperature {
    fn sample<'a>(
        &mut self,
        _res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        let temp = self.temperature;
        if temp != 1f32 {
            logits.iter_mut().for_each(|l| *l /= temp);
        }
        Ok(logits)
    }
}
