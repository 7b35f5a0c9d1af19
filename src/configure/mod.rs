//! Key/value configuration of option structs.
//!
//! Option structs describe their options with a table of
//! [OptionDefinition]s. From that, [Configurable] provides getting and
//! setting options by key and parsing configuration strings in the
//! format:
//!
//! `key1=value1:key2=value2:keyN=valueN`
//!
//! Keys may be shortened to any unambiguous prefix. Values are parsed from
//! strings to [u64], [f64], [bool] or a string first and only then converted
//! to the type of the field they end up in.

mod configurable;
mod metadata;
mod value;

use thiserror::Error;

#[doc(inline)]
pub use self::{configurable::*, metadata::*, value::*};

/// Option handling errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigureError {
    #[error("unknown option key {0} or bad type")]
    /// Unknown option key or incorrect type specified.
    UnknownOrBadType(String),

    /// The supplied key can match multiple options.
    #[error("option key {0} is ambiguous")]
    AmbiguousKey(String),

    /// An error occurred converting the option value.
    #[error("option value conversion for key {0} failed")]
    ConversionFailure(String),

    /// A value could not be parsed for the option's type.
    #[error("cannot parse {value:?} as {typ:?}")]
    BadValue { typ: OptionType, value: String },
}
