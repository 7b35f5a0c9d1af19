use std::{borrow::Cow, str::FromStr};

use num_traits::FromPrimitive;

use super::ConfigureError;

/// Enum that holds the value for an option.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue<'a> {
    /// Unsigned integer value.
    UInt(u64),

    /// Signed float value.
    Float(f64),

    /// Boolean value.
    Bool(bool),

    /// String value.
    String(Cow<'a, str>),
}

/// Option types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    /// Unsigned integer value.
    UInt,

    /// Signed float value.
    Float,

    /// Boolean value.
    Bool,

    /// String value.
    String,
}

impl<'a> OptionValue<'a> {
    /// Try to parse a string reference to an option value.
    ///
    /// Float options allow specifying `-inf` for negative infinity
    /// and `inf` or `+inf` for infinity.
    pub fn parse_value(typ: OptionType, s: impl AsRef<str>) -> Result<Self, ConfigureError> {
        let s = s.as_ref().trim();
        let bad = || ConfigureError::BadValue {
            typ,
            value: s.to_string(),
        };
        Ok(match typ {
            OptionType::UInt => Self::UInt(u64::from_str(s).map_err(|_| bad())?),
            OptionType::Float => Self::Float(match s {
                "-inf" | "-INF" => f64::NEG_INFINITY,
                "inf" | "INF" | "+inf" | "+INF" => f64::INFINITY,
                other => f64::from_str(other).map_err(|_| bad())?,
            }),
            OptionType::Bool => Self::Bool(match s {
                "true" | "t" | "yes" | "1" => true,
                "false" | "f" | "no" | "0" => false,
                _ => Err(bad())?,
            }),
            OptionType::String => Self::String(Cow::Owned(s.to_string())),
        })
    }

    pub fn option_type(&self) -> OptionType {
        match self {
            Self::UInt(_) => OptionType::UInt,
            Self::Float(_) => OptionType::Float,
            Self::Bool(_) => OptionType::Bool,
            Self::String(_) => OptionType::String,
        }
    }

    /// Converts a float value into the field type `F`.
    pub fn into_float<F: FromPrimitive>(self, key: &str) -> Result<F, ConfigureError> {
        match self {
            Self::Float(v) => {
                F::from_f64(v).ok_or_else(|| ConfigureError::ConversionFailure(key.to_string()))
            }
            _ => Err(ConfigureError::UnknownOrBadType(key.to_string())),
        }
    }

    /// Converts an unsigned value into the field type `UI`.
    pub fn into_uint<UI: FromPrimitive>(self, key: &str) -> Result<UI, ConfigureError> {
        match self {
            Self::UInt(v) => {
                UI::from_u64(v).ok_or_else(|| ConfigureError::ConversionFailure(key.to_string()))
            }
            _ => Err(ConfigureError::UnknownOrBadType(key.to_string())),
        }
    }

    pub fn into_bool(self, key: &str) -> Result<bool, ConfigureError> {
        match self {
            Self::Bool(v) => Ok(v),
            _ => Err(ConfigureError::UnknownOrBadType(key.to_string())),
        }
    }

    pub fn into_string(self, key: &str) -> Result<String, ConfigureError> {
        match self {
            Self::String(v) => Ok(v.into_owned()),
            _ => Err(ConfigureError::UnknownOrBadType(key.to_string())),
        }
    }
}
