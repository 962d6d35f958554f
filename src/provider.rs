//! The two banking providers this gateway fronts, and the per-provider
//! strategy table: token endpoint shape, OAuth scope, fallback token
//! lifetime, and which pooling strategy the token manager applies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "ITAU")]
    Itau,
    #[serde(rename = "INTER")]
    Inter,
}

/// How tokens for a provider are managed after issuance.
///
/// Itau tokens live for minutes, so a rotating pool amortizes the OAuth
/// round-trip cost across callers. Inter tokens live for years, so a single
/// cached row is enough and reads never trigger synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStrategy {
    Pool,
    Single,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Itau, Provider::Inter];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Itau => "ITAU",
            Provider::Inter => "INTER",
        }
    }

    /// Lowercase tag used as the pool-id prefix.
    pub fn slug(&self) -> &'static str {
        match self {
            Provider::Itau => "itau",
            Provider::Inter => "inter",
        }
    }

    pub fn strategy(&self) -> TokenStrategy {
        match self {
            Provider::Itau => TokenStrategy::Pool,
            Provider::Inter => TokenStrategy::Single,
        }
    }

    /// Declared lifetime to use when the provider's token response omits
    /// `expires_in`. Inter leaves it out and documents a two-year validity.
    pub fn default_expires_in(&self) -> i64 {
        match self {
            Provider::Itau => 300,
            Provider::Inter => 63_072_000,
        }
    }

    /// Scope string the provider expects on the grant request, if any.
    pub fn scope(&self) -> Option<&'static str> {
        match self {
            Provider::Itau => None,
            Provider::Inter => Some("pix-read pix-write boleto-read boleto-write conta-read"),
        }
    }
}

impl FromStr for Provider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ITAU" => Ok(Provider::Itau),
            "INTER" => Ok(Provider::Inter),
            other => Err(AppError::InvalidArgument(format!(
                "unsupported provider: {other}"
            ))),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_providers() {
        assert_eq!("ITAU".parse::<Provider>().unwrap(), Provider::Itau);
        assert_eq!("INTER".parse::<Provider>().unwrap(), Provider::Inter);
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = "BRADESCO".parse::<Provider>().unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn strategy_table() {
        assert_eq!(Provider::Itau.strategy(), TokenStrategy::Pool);
        assert_eq!(Provider::Inter.strategy(), TokenStrategy::Single);
        assert_eq!(Provider::Inter.default_expires_in(), 63_072_000);
        assert!(Provider::Itau.scope().is_none());
        assert!(Provider::Inter.scope().unwrap().contains("pix-write"));
    }
}
