use std::{
    fmt::Debug,
    ops::{Add, AddAssign},
};

use crate::types::{HasSamplerResources, Logits, Sampler, TID};

#[derive(Debug)]
/// An ordered list of stages that run in sequence over the same [Logits].
/// It implements [Sampler] itself, so chains nest. If the last stage that ran
/// selected a token, [Sampler::sampled_token_id] on the chain reports it.
///
/// The stage type defaults to boxed trait objects; the pipeline uses
/// [crate::stage::Stage] so it can still inspect individual stages.
pub struct SamplerChain<S = Box<dyn Sampler>> {
    samplers: Vec<S>,
    token: Option<TID>,
}

impl<S> Default for SamplerChain<S> {
    fn default() -> Self {
        Self {
            samplers: vec![],
            token: None,
        }
    }
}

impl<S: Sampler> SamplerChain<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_sampler(&mut self, sampler: S) -> &mut Self {
        self.token = None;
        self.samplers.push(sampler);
        self
    }

    pub fn samplers(&self) -> &[S] {
        &self.samplers
    }

    pub fn samplers_mut(&mut self) -> &mut [S] {
        &mut self.samplers
    }

    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }
}

impl SamplerChain {
    /// Box and push any sampler.
    pub fn push_boxed(&mut self, sampler: impl Sampler + 'static) -> &mut Self {
        self.push_sampler(Box::new(sampler))
    }
}

impl<S> FromIterator<S> for SamplerChain<S> {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            samplers: iter.into_iter().collect(),
            token: None,
        }
    }
}

impl<S: Sampler> Sampler for SamplerChain<S> {
    fn sample<'a>(
        &mut self,
        res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        self.token = None;
        self.samplers
            .iter_mut()
            .try_fold(logits, |logits, sampler| {
                let new_logits = sampler.sample(res, logits)?;
                if let Some(tid) = sampler.sampled_token_id() {
                    self.token = Some(tid);
                }
                Ok(new_logits)
            })
    }

    fn sampled_token_id(&self) -> Option<TID> {
        self.token
    }
}

impl<Rhs> AddAssign<Rhs> for SamplerChain
where
    Rhs: Sampler + 'static,
{
    fn add_assign(&mut self, rhs: Rhs) {
        let _ = self.push_boxed(rhs);
    }
}

impl<Rhs> Add<Rhs> for SamplerChain
where
    Rhs: Sampler + 'static,
{
    type Output = Self;

    fn add(mut self, rhs: Rhs) -> Self::Output {
        self += rhs;
        self
    }
}
