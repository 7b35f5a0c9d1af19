use std::fmt;

use crate::{samplers::*, types::*};

/// Priority names in their default order. `epsilon_cutoff` and `eta_cutoff`
/// have no stage here; they are accepted so existing priority lists keep
/// working.
pub const DEFAULT_SAMPLER_PRIORITY: &[&str] = &[
    "temperature",
    "dynamic_temperature",
    "quadratic_sampling",
    "top_k",
    "top_p",
    "typical_p",
    "epsilon_cutoff",
    "eta_cutoff",
    "tfs",
    "top_a",
    "min_p",
    "mirostat",
];

/// Names moved to the end of the priority list by `temperature_last`, in
/// this order.
pub const TEMPERATURE_LAST_NAMES: &[&str] =
    &["temperature", "dynamic_temperature", "quadratic_sampling"];

/// The kinds of stage a pipeline can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Repetition,
    Temperature,
    DynamicTemperature,
    QuadraticSampling,
    TopK,
    TopP,
    TypicalP,
    TailFree,
    TopA,
    MinP,
    Mirostat,
    Normalize,
    Capture,
}

impl StageKind {
    /// The name used for this kind in a priority list. Repetition penalties,
    /// normalization and capture have fixed positions and no name.
    pub fn priority_name(self) -> Option<&'static str> {
        Some(match self {
            Self::Temperature => "temperature",
            Self::DynamicTemperature => "dynamic_temperature",
            Self::QuadraticSampling => "quadratic_sampling",
            Self::TopK => "top_k",
            Self::TopP => "top_p",
            Self::TypicalP => "typical_p",
            Self::TailFree => "tfs",
            Self::TopA => "top_a",
            Self::MinP => "min_p",
            Self::Mirostat => "mirostat",
            Self::Repetition | Self::Normalize | Self::Capture => return None,
        })
    }

    pub fn from_priority_name(name: &str) -> Option<Self> {
        Some(match name.trim() {
            "temperature" => Self::Temperature,
            "dynamic_temperature" => Self::DynamicTemperature,
            "quadratic_sampling" => Self::QuadraticSampling,
            "top_k" => Self::TopK,
            "top_p" => Self::TopP,
            "typical_p" => Self::TypicalP,
            "tfs" => Self::TailFree,
            "top_a" => Self::TopA,
            "min_p" => Self::MinP,
            "mirostat" => Self::Mirostat,
            _ => return None,
        })
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.priority_name(), self) {
            (Some(name), _) => f.write_str(name),
            (None, Self::Repetition) => f.write_str("repetition_penalty"),
            (None, Self::Normalize) => f.write_str("normalize"),
            (None, _) => f.write_str("capture"),
        }
    }
}

/// One pipeline stage with its parameters and any state it carries.
#[derive(Debug, Clone)]
pub enum Stage {
    Repetition(SampleRepetition),
    Temperature(SampleTemperature),
    DynamicTemperature(SampleDynamicTemperature),
    QuadraticSampling(SampleQuadratic),
    TopK(SampleTopK),
    TopP(SampleTopP),
    TypicalP(SampleLocallyTypical),
    TailFree(SampleTailFree),
    TopA(SampleTopA),
    MinP(SampleMinP),
    Mirostat(SampleMirostat2),
    Normalize(SampleNormalize),
    Capture(SampleCapture),
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Repetition(_) => StageKind::Repetition,
            Self::Temperature(_) => StageKind::Temperature,
            Self::DynamicTemperature(_) => StageKind::DynamicTemperature,
            Self::QuadraticSampling(_) => StageKind::QuadraticSampling,
            Self::TopK(_) => StageKind::TopK,
            Self::TopP(_) => StageKind::TopP,
            Self::TypicalP(_) => StageKind::TypicalP,
            Self::TailFree(_) => StageKind::TailFree,
            Self::TopA(_) => StageKind::TopA,
            Self::MinP(_) => StageKind::MinP,
            Self::Mirostat(_) => StageKind::Mirostat,
            Self::Normalize(_) => StageKind::Normalize,
            Self::Capture(_) => StageKind::Capture,
        }
    }

    fn as_sampler_mut(&mut self) -> &mut dyn Sampler {
        match self {
            Self::Repetition(s) => s,
            Self::Temperature(s) => s,
            Self::DynamicTemperature(s) => s,
            Self::QuadraticSampling(s) => s,
            Self::TopK(s) => s,
            Self::TopP(s) => s,
            Self::TypicalP(s) => s,
            Self::TailFree(s) => s,
            Self::TopA(s) => s,
            Self::MinP(s) => s,
            Self::Mirostat(s) => s,
            Self::Normalize(s) => s,
            Self::Capture(s) => s,
        }
    }
}

impl Sampler for Stage {
    fn sample<'a>(
        &mut self,
        res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        self.as_sampler_mut().sample(res, logits)
    }

    fn sampled_token_id(&self) -> Option<TID> {
        match self {
            Self::Mirostat(s) => s.sampled_token_id(),
            _ => None,
        }
    }
}
