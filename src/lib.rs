//! # LLM Warpers
//!
//! Order-sensitive logit warper pipelines for language model decoding.
//!
//! At every decoding step a model produces one raw score (logit) per
//! vocabulary entry. A [Pipeline](crate::pipeline::Pipeline) rewrites that
//! score vector in place: penalties for tokens already generated, temperature
//! scaling (fixed or entropy driven), quadratic smoothing and a set of
//! truncation stages that mask candidates by setting them to negative
//! infinity. What is left is a categorical distribution to draw the next
//! token from.
//!
//! ## Example
//!
//! ```rust
//! use anyhow::Result;
//!
//! use llm_warpers::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let mut config = DecodingConfig::default();
//!     config.configure("temperature=0.7:min_p=0.1:temperature_last=true")?;
//!
//!     let mut pipeline = Pipeline::new(&config)?;
//!     assert_eq!(
//!         pipeline.stage_kinds(),
//!         vec![StageKind::MinP, StageKind::Temperature]
//!     );
//!
//!     let mut res = SequenceResources::seeded(42, vec![]);
//!     let mut logits = Logits::try_from_iter([2.0f32, 1.0, 0.0, -1.0, -2.0])?;
//!     let token = pipeline
//!         .sample_token(&mut res, &mut logits)?
//!         .expect("no token sampled");
//!     assert!(logits[token as usize].is_finite());
//!     // The two least likely tokens fall below 10% of the top probability.
//!     assert_eq!(logits.finite_count(), 3);
//!     Ok(())
//! }
//! ```
//!
//! ## Stage order
//!
//! 1. [SampleRepetition](crate::samplers::SampleRepetition), when any penalty is set
//! 2. The distribution shaping stages that are switched on, ordered by
//!    `sampler_priority` (see [DecodingConfig](crate::config::DecodingConfig))
//! 3. [SampleNormalize](crate::samplers::SampleNormalize), when `renormalize_logits` is set
//! 4. [SampleCapture](crate::samplers::SampleCapture), when diagnostics are enabled

/// # Stages live here!
///
/// Every stage is usable on its own through the [Sampler](crate::types::Sampler) trait.
pub mod samplers;

/// Types and traits.
pub mod types;

/// Sampler chains
mod chain;

/// Sampler resources
mod resource;

/// Configuring options by key
pub mod configure;

pub mod config;

pub mod diagnostics;

pub mod pipeline;

pub mod stage;

#[cfg(test)]
mod tests;

/// Convenient rexports. The simplest way to use the crate is to just throw a
/// `use llm_warpers::prelude::*;`
/// into your project.
pub mod prelude {
    #[doc(inline)]
    pub use crate::{
        config::*,
        configure::{Configurable, ConfigureError},
        diagnostics::{CaptureMode, DiagnosticRecord, DiagnosticSink, Snapshot},
        pipeline::*,
        samplers::*,
        stage::*,
        types::*,
    };
}
