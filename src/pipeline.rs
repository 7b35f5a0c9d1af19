//! Pipelines built from a [DecodingConfig].
//!
//! A [Pipeline] is assembled once per generation call and then applied to
//! the raw scores of every step of one sequence. [BatchPipeline] holds one
//! independent pipeline per sequence of a batch, so stateful stages such as
//! Mirostat never see another sequence's draws.

use anyhow::Result;
use tracing::{debug, warn};

use crate::{
    config::{DecodingConfig, MIROSTAT_V2},
    diagnostics::{CaptureMode, DiagnosticSink, Snapshot},
    samplers::*,
    stage::{Stage, StageKind},
    types::*,
};

/// Builds the ordered stage list for `config`.
///
/// Repetition penalties come first since they work on raw logits. The
/// distribution shaping stages that are switched on follow, stably sorted by
/// their position in [DecodingConfig::priority]; anything without a position
/// goes last. Normalization (if requested) and `capture` close the list.
pub fn assemble_stages(
    config: &DecodingConfig,
    capture: Option<SampleCapture>,
) -> Result<Vec<Stage>, SamplerError> {
    config.validate()?;
    let mk = config.min_tokens_to_keep;
    let mut stages = vec![];

    let repetition = SampleRepetition::new(
        config.repetition_penalty,
        config.presence_penalty,
        config.frequency_penalty,
        config.repetition_penalty_range,
    )?;
    if repetition.is_active() {
        stages.push(Stage::Repetition(repetition));
    }

    let mut warpers = vec![Stage::Temperature(SampleTemperature::new(
        config.temperature,
    )?)];
    if config.top_k > 0 {
        warpers.push(Stage::TopK(SampleTopK::new(config.top_k, mk)));
    }
    if config.top_p < 1f32 {
        warpers.push(Stage::TopP(SampleTopP::new(config.top_p, mk)?));
    }
    if config.typical_p < 1f32 {
        warpers.push(Stage::TypicalP(SampleLocallyTypical::new(
            config.typical_p,
            mk,
        )?));
    }
    if config.tfs < 1f32 {
        warpers.push(Stage::TailFree(SampleTailFree::new(config.tfs, mk)?));
    }
    if config.top_a > 0f32 {
        warpers.push(Stage::TopA(SampleTopA::new(config.top_a, mk)?));
    }
    if config.min_p > 0f32 {
        warpers.push(Stage::MinP(SampleMinP::new(config.min_p, mk)?));
    }
    if config.dynamic_temperature {
        warpers.push(Stage::DynamicTemperature(SampleDynamicTemperature::new(
            config.dynatemp_low,
            config.dynatemp_high,
            config.dynatemp_exponent,
        )?));
    }
    if config.smoothing_factor > 0f32 {
        warpers.push(Stage::QuadraticSampling(SampleQuadratic::new(
            config.smoothing_factor,
            config.smoothing_curve,
        )?));
    }
    if config.mirostat_mode == MIROSTAT_V2 {
        warpers.push(Stage::Mirostat(SampleMirostat2::new(
            config.mirostat_tau,
            config.mirostat_eta,
        )?));
    }

    let priority = config.priority();
    let rank = |kind: StageKind| {
        priority
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(usize::MAX)
    };
    warpers.sort_by_key(|stage| rank(stage.kind()));
    stages.extend(warpers);

    if config.renormalize_logits {
        stages.push(Stage::Normalize(SampleNormalize::new()));
    }
    if let Some(capture) = capture {
        stages.push(Stage::Capture(capture));
    }
    Ok(stages)
}

/// The stages for one sequence plus the per-step bookkeeping around them.
#[derive(Debug)]
pub struct Pipeline {
    chain: SamplerChain<Stage>,
    sequence: usize,
    step: usize,
    n_vocab: Option<usize>,
    capture: Option<(DiagnosticSink, CaptureMode)>,
    rd_sampler: SampleRandDistrib,
    token: Option<TID>,
}

impl Pipeline {
    /// Validates `config` and assembles a pipeline for a single sequence.
    pub fn new(config: &DecodingConfig) -> Result<Self, SamplerError> {
        Self::for_sequence(config, 0)
    }

    pub fn for_sequence(config: &DecodingConfig, sequence: usize) -> Result<Self, SamplerError> {
        Self::build(config, sequence, None)
    }

    /// Like [Pipeline::for_sequence], additionally recording the scores before
    /// and after every step (and the chosen token) into `sink`.
    pub fn with_diagnostics(
        config: &DecodingConfig,
        sink: DiagnosticSink,
        sequence: usize,
        mode: CaptureMode,
    ) -> Result<Self, SamplerError> {
        Self::build(config, sequence, Some((sink, mode)))
    }

    fn build(
        config: &DecodingConfig,
        sequence: usize,
        capture: Option<(DiagnosticSink, CaptureMode)>,
    ) -> Result<Self, SamplerError> {
        let capture_stage = capture
            .as_ref()
            .map(|(sink, mode)| SampleCapture::new(sink.clone(), sequence, *mode));
        let chain = assemble_stages(config, capture_stage)?
            .into_iter()
            .collect::<SamplerChain<Stage>>();
        let pipeline = Self {
            chain,
            sequence,
            step: 0,
            n_vocab: None,
            capture,
            rd_sampler: SampleRandDistrib::new(),
            token: None,
        };
        debug!(
            sequence,
            stages = ?pipeline.stage_kinds(),
            "assembled decoding pipeline"
        );
        Ok(pipeline)
    }

    /// The assembled stages in execution order.
    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.chain.samplers().iter().map(Stage::kind).collect()
    }

    pub fn stages(&self) -> &[Stage] {
        self.chain.samplers()
    }

    pub fn sequence(&self) -> usize {
        self.sequence
    }

    /// Number of steps applied so far.
    pub fn step(&self) -> usize {
        self.step
    }

    /// `(mu, error)` of the Mirostat controller, if the pipeline has one.
    pub fn mirostat_state(&self) -> Option<(L, L)> {
        self.chain.samplers().iter().find_map(|stage| match stage {
            Stage::Mirostat(m) => Some((m.current_mu(), m.last_error())),
            _ => None,
        })
    }

    /// Runs every stage over the raw scores of one step.
    ///
    /// The vocabulary size is fixed by the first call. The result is only
    /// handed on when every entry is finite or masked: an overflow to NaN or
    /// `+inf` fails with [LogitsError::InvalidLogit], and a result without a
    /// single finite entry with [SamplerError::NumericDegeneracy].
    pub fn apply<'a>(
        &mut self,
        res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> Result<&'a mut Logits> {
        let got = logits.n_vocab();
        match self.n_vocab {
            Some(expected) if expected != got => Err(SamplerError::from(
                LogitsError::VocabMismatch { expected, got },
            ))?,
            _ => self.n_vocab = Some(got),
        }

        if let Some((sink, mode)) = &self.capture {
            sink.begin_step(self.sequence, Some(Snapshot::capture(logits, *mode)?))?;
        }

        let step = self.step;
        self.step += 1;
        self.token = None;
        let logits = self.chain.sample(res, logits)?;
        if let Some(idx) = logits.first_invalid() {
            warn!(
                sequence = self.sequence,
                step,
                token_id = idx,
                "decoding stages produced an invalid score"
            );
            Err(SamplerError::from(LogitsError::InvalidLogit(idx)))?
        }
        if logits.is_degenerate() {
            warn!(sequence = self.sequence, step, "no candidates left after decoding stages");
            Err(SamplerError::NumericDegeneracy {
                sequence: self.sequence,
                step,
            })?
        }
        self.token = self.chain.sampled_token_id();
        Ok(logits)
    }

    /// Stores the token chosen for the latest step in the diagnostic sink.
    /// Only needed when the caller draws from the final scores itself.
    pub fn record_choice(&self, token_id: TID) -> Result<(), SamplerError> {
        match &self.capture {
            Some((sink, _)) => sink.record_choice(self.sequence, token_id),
            None => Ok(()),
        }
    }
}

impl Sampler for Pipeline {
    fn sample<'a>(
        &mut self,
        res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> Result<&'a mut Logits> {
        self.apply(res, logits)
    }

    fn sampled_token_id(&self) -> Option<TID> {
        self.token
    }

    /// Applies the pipeline, then takes the token Mirostat picked or draws
    /// one from the final distribution.
    fn sample_token(
        &mut self,
        res: &mut dyn HasSamplerResources,
        logits: &mut Logits,
    ) -> Result<Option<TID>> {
        let logits = self.apply(res, logits)?;
        if self.token.is_none() {
            self.token = self.rd_sampler.sample_token(res, logits)?;
        }
        if let Some(tid) = self.token {
            self.record_choice(tid)?;
        }
        Ok(self.token)
    }
}

/// One [Pipeline] per sequence of a batch.
#[derive(Debug)]
pub struct BatchPipeline {
    pipelines: Vec<Pipeline>,
}

impl BatchPipeline {
    pub fn new(config: &DecodingConfig, batch_size: usize) -> Result<Self, SamplerError> {
        Ok(Self {
            pipelines: (0..batch_size)
                .map(|seq| Pipeline::for_sequence(config, seq))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Every sequence writes to its own slot of the shared `sink`.
    pub fn with_diagnostics(
        config: &DecodingConfig,
        batch_size: usize,
        sink: DiagnosticSink,
        mode: CaptureMode,
    ) -> Result<Self, SamplerError> {
        Ok(Self {
            pipelines: (0..batch_size)
                .map(|seq| Pipeline::with_diagnostics(config, sink.clone(), seq, mode))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn pipeline(&self, sequence: usize) -> Option<&Pipeline> {
        self.pipelines.get(sequence)
    }

    fn check_batch<R>(&self, res: &[R], logits: &[Logits]) -> Result<(), SamplerError> {
        let expected = self.pipelines.len();
        if let Some(got) = [res.len(), logits.len()].into_iter().find(|&n| n != expected) {
            Err(SamplerError::BatchMismatch { expected, got })?
        }
        if let Some(first) = logits.first() {
            let expected = first.n_vocab();
            if let Some(l) = logits.iter().find(|l| l.n_vocab() != expected) {
                Err(LogitsError::VocabMismatch {
                    expected,
                    got: l.n_vocab(),
                })?
            }
        }
        Ok(())
    }

    /// Applies each sequence's pipeline to its own scores, in place.
    pub fn apply<R: HasSamplerResources>(
        &mut self,
        res: &mut [R],
        logits: &mut [Logits],
    ) -> Result<()> {
        self.check_batch(res, logits)?;
        self.pipelines
            .iter_mut()
            .zip(res.iter_mut())
            .zip(logits.iter_mut())
            .try_for_each(|((pipeline, res), logits)| {
                pipeline.apply(res, logits)?;
                Ok(())
            })
    }

    /// Applies the pipelines and picks one token per sequence.
    pub fn sample_tokens<R: HasSamplerResources>(
        &mut self,
        res: &mut [R],
        logits: &mut [Logits],
    ) -> Result<Vec<Option<TID>>> {
        self.check_batch(res, logits)?;
        self.pipelines
            .iter_mut()
            .zip(res.iter_mut())
            .zip(logits.iter_mut())
            .map(|((pipeline, res), logits)| pipeline.sample_token(res, logits))
            .collect()
    }
}
