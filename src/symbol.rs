use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

const MAX_SYMBOL_LEN: usize = 32;

/// A tradable instrument code, e.g. `"BTC-USD"`.
///
/// Codes are upper-case ASCII letters and digits plus `-`, `_` and `.`.
/// `:` is never allowed because the trade store uses it as a key delimiter.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, bincode::Encode,
    bincode::Decode,
)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn supported() -> Vec<Symbol> {
        vec![Symbol("BTC-USD".into()), Symbol("ETH-USD".into())]
    }
}

impl FromStr for Symbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err("symbol must not be empty".into());
        }
        if code.len() > MAX_SYMBOL_LEN {
            return Err(format!(
                "symbol `{}` is longer than {} characters",
                s, MAX_SYMBOL_LEN
            ));
        }
        if let Some(bad) = code
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(format!("invalid character `{}` in symbol `{}`", bad, s));
        }
        Ok(Symbol(code))
    }
}

impl TryFrom<String> for Symbol {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
