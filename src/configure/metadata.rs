use super::*;

/// Describes one option of a [Configurable] type `T` and how to read and
/// write it.
pub struct OptionDefinition<T: 'static> {
    /// Option name.
    pub key: &'static str,

    /// Optional description.
    pub desc: Option<&'static str>,

    /// The type of option.
    pub typ: OptionType,

    /// Reads the current value.
    pub get: fn(&T) -> OptionValue<'_>,

    /// Stores a value. Only ever called with a value of type `typ`.
    pub set: fn(&mut T, OptionValue<'_>) -> Result<(), ConfigureError>,
}

impl<T> std::fmt::Debug for OptionDefinition<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionDefinition")
            .field("key", &self.key)
            .field("desc", &self.desc)
            .field("typ", &self.typ)
            .finish()
    }
}

/// Finds the definition for `key`. An exact key match always wins, otherwise
/// `key` has to be the prefix of exactly one option.
pub fn find_option_definition<'d, T>(
    options: &'d [OptionDefinition<T>],
    key: &str,
) -> Result<&'d OptionDefinition<T>, ConfigureError> {
    let key = key.trim();
    if let Some(def) = options.iter().find(|def| def.key == key) {
        return Ok(def);
    }

    let mut it = options.iter().filter(|def| def.key.starts_with(key));
    let Some(def) = it.next() else {
        return Err(ConfigureError::UnknownOrBadType(if key.is_empty() {
            "<unspecified>".to_string()
        } else {
            key.to_string()
        }));
    };
    if it.next().is_some() {
        Err(ConfigureError::AmbiguousKey(key.to_string()))?
    }
    Ok(def)
}
