use std::cmp::Ordering;

use crate::types::*;

/// # Locally typical sampling
/// See: <https://arxiv.org/abs/2202.00666>
///
/// Ranks tokens by how close their surprise `-ln(p)` is to the entropy of the
/// distribution and keeps the closest ones until their probabilities add up
/// to more than `p`.
///
/// **Properties**:
/// - Filters logits
///
/// **Parameters**:
/// - `min_keep`: Minimum number of entries to keep. (default: `1`)
/// - `p`: Cumulative probability to keep, `1.0` disables. (default: `1.0`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleLocallyTypical {
    pub(crate) p: L,
    pub(crate) min_keep: usize,
}

impl Default for SampleLocallyTypical {
    fn default() -> Self {
        Self {
            p: 1f32,
            min_keep: 1,
        }
    }
}

impl SampleLocallyTypical {
    pub fn new(p: L, min_keep: usize) -> Result<Self, SamplerError> {
        if !(0f32..=1f32).contains(&p) {
            Err(SamplerError::InvalidConfiguration(format!(
                "typical_p has to be a float >= 0 and <= 1, but is {p}"
            )))?
        }
        Ok(Self { p, min_keep })
    }
}

impl Sampler for SampleLocallyTypical {
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
        let min_keep = min_keep.saturating_sub(1);
        let probs = logits.softmax();

        let ent = probs
            .iter()
            .filter(|p| **p > 0f32)
            .fold(0f32, |ent, p| ent - p * p.ln());

        let mut shifted = probs
            .iter()
            .enumerate()
            .filter(|(_, p)| **p > 0f32)
            .map(|(tid, p)| (tid, *p, (-p.ln() - ent).abs()))
            .collect::<Vec<_>>();
        {
            let mut sort_err = Ok(());
            shifted.sort_by(|a, b| {
                a.2.partial_cmp(&b.2).unwrap_or_else(|| {
                    sort_err = Err(SamplerError::InternalError(String::from(
                        "Impossible: logit comparison failed?",
                    )));
                    Ordering::Less
                })
            });
            sort_err?;
        }

        let mut cum_sum = 0f32;
        let last_idx = match shifted.iter().enumerate().try_fold(
            shifted.len(),
            |last_idx, (idx, (_tid, prob, _score))| {
                cum_sum += prob;
                if cum_sum > p && idx >= min_keep {
                    return Break(idx + 1);
                }
                Continue(last_idx)
            },
        ) {
            Continue(i) => i,
            Break(i) => i,
        };
        shifted
            .into_iter()
            .skip(last_idx)
            .for_each(|(tid, _, _)| {
                logits.mask(tid);
            });
        Ok(logits)
    }
}
