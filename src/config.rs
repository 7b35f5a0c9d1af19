//! Decoding configuration.
//!
//! [DecodingConfig] carries every parameter the pipeline understands. It can
//! be loaded from a generation config JSON file (unknown keys are ignored,
//! missing keys take their defaults), adjusted with a `key=value:...` string
//! through [Configurable], and is validated before any pipeline is built.

use std::{borrow::Cow, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    configure::*,
    samplers::*,
    stage::{StageKind, DEFAULT_SAMPLER_PRIORITY, TEMPERATURE_LAST_NAMES},
    types::*,
};

/// The only Mirostat variant the pipeline implements.
pub const MIROSTAT_V2: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingConfig {
    pub temperature: L,
    pub top_k: usize,
    pub top_p: L,
    pub typical_p: L,
    pub min_p: L,
    pub tfs: L,
    pub top_a: L,

    pub dynamic_temperature: bool,
    pub dynatemp_low: L,
    pub dynatemp_high: L,
    pub dynatemp_exponent: L,

    pub smoothing_factor: L,
    pub smoothing_curve: L,

    pub mirostat_mode: usize,
    pub mirostat_tau: L,
    pub mirostat_eta: L,

    pub repetition_penalty: L,
    pub presence_penalty: L,
    pub frequency_penalty: L,
    pub repetition_penalty_range: usize,

    pub sampler_priority: Vec<String>,
    pub temperature_last: bool,

    pub min_tokens_to_keep: usize,
    pub renormalize_logits: bool,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: 0,
            top_p: 1.0,
            typical_p: 1.0,
            min_p: 0.0,
            tfs: 1.0,
            top_a: 0.0,
            dynamic_temperature: false,
            dynatemp_low: 1.0,
            dynatemp_high: 1.0,
            dynatemp_exponent: 1.0,
            smoothing_factor: 0.0,
            smoothing_curve: 1.0,
            mirostat_mode: 0,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
            repetition_penalty: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            repetition_penalty_range: 0,
            sampler_priority: DEFAULT_SAMPLER_PRIORITY
                .iter()
                .map(|s| s.to_string())
                .collect(),
            temperature_last: false,
            min_tokens_to_keep: 1,
            renormalize_logits: false,
        }
    }
}

impl DecodingConfig {
    /// Parses and validates a JSON generation config.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON generation config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading decoding config {}", path.display()))?;
        Self::from_json_str(&s).with_context(|| format!("loading {}", path.display()))
    }

    /// Range checks every option, including ones whose stage is currently
    /// disabled. The first violation is returned.
    pub fn validate(&self) -> Result<(), SamplerError> {
        let mk = self.min_tokens_to_keep;
        if mk == 0 {
            Err(SamplerError::InvalidConfiguration(String::from(
                "min_tokens_to_keep has to be at least 1",
            )))?
        }
        SampleTemperature::new(self.temperature)?;
        SampleTopP::new(self.top_p, mk)?;
        SampleLocallyTypical::new(self.typical_p, mk)?;
        SampleMinP::new(self.min_p, mk)?;
        SampleTailFree::new(self.tfs, mk)?;
        SampleTopA::new(self.top_a, mk)?;
        SampleDynamicTemperature::new(
            self.dynatemp_low,
            self.dynatemp_high,
            self.dynatemp_exponent,
        )?;
        SampleQuadratic::new(self.smoothing_factor, self.smoothing_curve)?;
        if self.mirostat_mode != 0 && self.mirostat_mode != MIROSTAT_V2 {
            Err(SamplerError::InvalidConfiguration(format!(
                "mirostat_mode has to be 0 or {MIROSTAT_V2}, but is {}",
                self.mirostat_mode
            )))?
        }
        SampleMirostat2::new(self.mirostat_tau, self.mirostat_eta)?;
        SampleRepetition::new(
            self.repetition_penalty,
            self.presence_penalty,
            self.frequency_penalty,
            self.repetition_penalty_range,
        )?;
        Ok(())
    }

    /// The effective stage order: `sampler_priority` with `temperature_last`
    /// applied, resolved to stage kinds. Names without a stage are dropped.
    pub fn priority(&self) -> Vec<StageKind> {
        let mut names = self
            .sampler_priority
            .iter()
            .map(|s| s.trim())
            .collect::<Vec<_>>();
        if self.temperature_last {
            TEMPERATURE_LAST_NAMES.iter().for_each(|moved| {
                if let Some(idx) = names.iter().position(|name| name == moved) {
                    let name = names.remove(idx);
                    names.push(name);
                }
            });
        }
        names
            .into_iter()
            .filter_map(|name| {
                let kind = StageKind::from_priority_name(name);
                if kind.is_none() && !DEFAULT_SAMPLER_PRIORITY.contains(&name) {
                    warn!(name, "ignoring unknown sampler priority name");
                }
                kind
            })
            .collect()
    }
}

fn set_priority(cfg: &mut DecodingConfig, val: OptionValue<'_>) -> Result<(), ConfigureError> {
    cfg.sampler_priority = val
        .into_string("sampler_priority")?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    Ok(())
}

macro_rules! float_option {
    ($key:ident) => {
        OptionDefinition {
            key: stringify!($key),
            desc: None,
            typ: OptionType::Float,
            get: |cfg| OptionValue::Float(f64::from(cfg.$key)),
            set: |cfg, val| {
                cfg.$key = val.into_float(stringify!($key))?;
                Ok(())
            },
        }
    };
}

macro_rules! uint_option {
    ($key:ident) => {
        OptionDefinition {
            key: stringify!($key),
            desc: None,
            typ: OptionType::UInt,
            get: |cfg| OptionValue::UInt(cfg.$key as u64),
            set: |cfg, val| {
                cfg.$key = val.into_uint(stringify!($key))?;
                Ok(())
            },
        }
    };
}

macro_rules! bool_option {
    ($key:ident) => {
        OptionDefinition {
            key: stringify!($key),
            desc: None,
            typ: OptionType::Bool,
            get: |cfg| OptionValue::Bool(cfg.$key),
            set: |cfg, val| {
                cfg.$key = val.into_bool(stringify!($key))?;
                Ok(())
            },
        }
    };
}

impl Configurable for DecodingConfig {
    const OPTIONS: &'static [OptionDefinition<Self>] = &[
        float_option!(temperature),
        uint_option!(top_k),
        float_option!(top_p),
        float_option!(typical_p),
        float_option!(min_p),
        float_option!(tfs),
        float_option!(top_a),
        bool_option!(dynamic_temperature),
        float_option!(dynatemp_low),
        float_option!(dynatemp_high),
        float_option!(dynatemp_exponent),
        float_option!(smoothing_factor),
        float_option!(smoothing_curve),
        uint_option!(mirostat_mode),
        float_option!(mirostat_tau),
        float_option!(mirostat_eta),
        float_option!(repetition_penalty),
        float_option!(presence_penalty),
        float_option!(frequency_penalty),
        uint_option!(repetition_penalty_range),
        OptionDefinition {
            key: "sampler_priority",
            desc: Some("Comma separated stage names, highest priority first."),
            typ: OptionType::String,
            get: |cfg| OptionValue::String(Cow::Owned(cfg.sampler_priority.join(","))),
            set: set_priority,
        },
        bool_option!(temperature_last),
        uint_option!(min_tokens_to_keep),
        bool_option!(renormalize_logits),
    ];
}
