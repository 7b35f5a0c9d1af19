use crate::types::*;

/// # Quadratic sampling (smoothing)
/// Reshapes the logits around the current maximum. With `d = logit - max`:
///
/// `logit' = -(k * factor * d^2) + (s * factor * d^3) + max`
///
/// where `k = (3 - curve) / 2` and `s = (curve - 1) / 2`. At `curve = 1` this
/// is a pure quadratic falloff. Other curves blend in a cubic term, which is
/// not guaranteed to stay monotonic. Masked entries stay masked, and an
/// entry whose new value overflows is masked as well.
///
/// **Properties**:
/// - Modifies logits
///
/// **Parameters**:
/// - `factor`: Smoothing factor, `0.0` disables. (default: `0.0`)
/// - `curve`: Smoothing curve. (default: `1.0`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleQuadratic {
    pub(crate) factor: L,
    pub(crate) curve: L,
}

impl Default for SampleQuadratic {
    fn default() -> Self {
        Self {
            factor: 0f32,
            curve: 1f32,
        }
    }
}

impl SampleQuadratic {
    pub fn new(factor: L, curve: L) -> Result<Self, SamplerError> {
        if !(factor >= 0f32 && factor.is_finite()) {
            Err(SamplerError::InvalidConfiguration(format!(
                "smoothing_factor has to be a non-negative float, but is {factor}"
            )))?
        }
        if !curve.is_finite() {
            Err(SamplerError::InvalidConfiguration(format!(
                "smoothing_curve has to be finite, but is {curve}"
            )))?
        }
        Ok(Self { factor, curve })
    }
}

impl Sampler for SampleQuadratic {
    fn sample<'a>(
        &mut self,
        _res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        let Self { factor, curve } = *self;
        let Some(max_l) = logits.max_logit() else {
            return Ok(logits);
        };
        let k = (3f32 - curve) / 2f32;
        let s = (curve - 1f32) / 2f32;

        logits
            .iter_mut()
            .filter(|l| l.is_finite())
            .for_each(|l| {
                let diff = *l - max_l;
                let mut new_l = max_l;
                // Skip zero terms: 0 * inf is NaN for entries far below the max.
                if k != 0f32 {
                    new_l -= k * factor * diff.powi(2);
                }
                if s != 0f32 {
                    new_l += s * factor * diff.powi(3);
                }
                *l = if new_l.is_finite() {
                    new_l
                } else {
                    L::NEG_INFINITY
                };
            });
        Ok(logits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadratic_falloff() -> anyhow::Result<()> {
        let mut logits = Logits::try_from_iter([2.0f32, 1.0, 0.0, f32::NEG_INFINITY])?;
        SampleQuadratic::new(0.5, 1.0)?.sample(&mut (), &mut logits)?;
        assert_eq!(&logits[..], &[2.0, 1.5, 0.0, f32::NEG_INFINITY]);
        Ok(())
    }

    #[test]
    fn overflow_is_masked() -> anyhow::Result<()> {
        let mut logits = Logits::try_from_iter([2.0f32, 1.0, f32::MIN])?;
        SampleQuadratic::new(0.5, 1.0)?.sample(&mut (), &mut logits)?;
        assert_eq!(&logits[..], &[2.0, 1.5, f32::NEG_INFINITY]);

        // A negative quadratic weight pushes far entries towards +inf.
        let mut logits = Logits::try_from_iter([2.0f32, f32::MIN])?;
        SampleQuadratic::new(0.5, 5.0)?.sample(&mut (), &mut logits)?;
        assert_eq!(logits[0], 2.0);
        assert_eq!(logits[1], f32::NEG_INFINITY);
        Ok(())
    }

    #[test]
    fn cubic_term() -> anyhow::Result<()> {
        // curve 3: k = 0, s = 1, so logit' = factor * d^3 + max.
        let mut logits = Logits::try_from_iter([1.0f32, 0.0, -1.0])?;
        SampleQuadratic::new(2.0, 3.0)?.sample(&mut (), &mut logits)?;
        assert_eq!(&logits[..], &[1.0, -1.0, -15.0]);
        Ok(())
    }
}
