use anyhow::Result;

use super::*;

/// Types configurable by option key. Only the `OPTIONS` table has to be
/// provided; everything else has default implementations.
pub trait Configurable: Sized + 'static {
    /// Option definitions, in display order.
    const OPTIONS: &'static [OptionDefinition<Self>];

    /// Sets the option `key` (or an unambiguous prefix of it).
    fn set_option(&mut self, key: &str, val: OptionValue) -> Result<()> {
        let def = find_option_definition(Self::OPTIONS, key)?;
        if val.option_type() != def.typ {
            Err(ConfigureError::UnknownOrBadType(def.key.to_string()))?
        }
        (def.set)(self, val)?;
        Ok(())
    }

    /// Gets an option by key (or an unambiguous prefix of it).
    fn get_option(&self, key: &str) -> Result<OptionValue<'_>> {
        let def = find_option_definition(Self::OPTIONS, key)?;
        Ok((def.get)(self))
    }

    /// Updates options from a string in the format:
    ///
    /// `key1=value1:key2=value2:keyN=valueN`
    ///
    /// Values cannot contain `=` or `:` and whitespace at the beginning and
    /// end of parts is stripped.
    fn configure(&mut self, s: &str) -> Result<()> {
        s.trim()
            .split(':')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .try_for_each(|kv| {
                let (k, v) = kv.split_once('=').unwrap_or(("", kv));
                let def = find_option_definition(Self::OPTIONS, k)?;
                self.set_option(def.key, OptionValue::parse_value(def.typ, v)?)
            })
    }
}
