//! # Asset Resolution
//!
//! Turns a user-facing currency code (plus an optional issuer) into the
//! ledger's asset descriptor. The native currency has no issuer; everything
//! else is identified by `(code, issuer)` and two issued assets with the same
//! code but different issuers are different assets.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::config::{NetworkConfig, MAX_ASSET_CODE_LENGTH, NATIVE_ASSET_CODE};
use crate::error::RemitError;

/// A ledger asset. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Asset {
    /// The network's base currency.
    Native,
    /// A third-party-issued currency.
    Issued { code: String, issuer: Address },
}

impl Asset {
    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Native)
    }

    /// The issuing account, if any.
    pub fn issuer(&self) -> Option<&Address> {
        match self {
            Asset::Native => None,
            Asset::Issued { issuer, .. } => Some(issuer),
        }
    }

    /// Display code. The native asset reports the configured native code.
    pub fn code<'a>(&'a self, native_code: &'a str) -> &'a str {
        match self {
            Asset::Native => native_code,
            Asset::Issued { code, .. } => code,
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => write!(f, "native"),
            Asset::Issued { code, issuer } => write!(f, "{}:{}", code, issuer),
        }
    }
}

/// Maps currency codes onto [`Asset`]s for one network.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    native_code: String,
}

impl AssetResolver {
    pub fn new(native_code: impl Into<String>) -> Self {
        Self {
            native_code: native_code.into(),
        }
    }

    pub fn native_code(&self) -> &str {
        &self.native_code
    }

    /// Resolves `code` and `issuer` into an asset.
    ///
    /// The native code (case-insensitive) and the empty code both mean
    /// [`Asset::Native`]; any issuer passed alongside is ignored. Every other
    /// code must be 1-12 ASCII alphanumerics with a well-formed issuer.
    pub fn resolve(&self, code: &str, issuer: Option<&str>) -> Result<Asset, RemitError> {
        let code = code.trim();
        if code.is_empty() || code.eq_ignore_ascii_case(&self.native_code) {
            if issuer.is_some_and(|i| !i.trim().is_empty()) {
                tracing::debug!(code, "issuer ignored for native asset");
            }
            return Ok(Asset::Native);
        }

        let invalid = |reason: &str| RemitError::InvalidAsset {
            code: code.to_string(),
            reason: reason.to_string(),
        };

        if code.len() > MAX_ASSET_CODE_LENGTH {
            return Err(invalid("asset codes are at most 12 characters"));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid("asset codes are ASCII alphanumeric"));
        }

        let issuer = match issuer.map(str::trim) {
            Some(i) if !i.is_empty() => i,
            _ => return Err(invalid("non-native asset requires an issuer")),
        };
        let issuer = Address::parse(issuer).map_err(|e| invalid(&format!("bad issuer: {}", e)))?;

        Ok(Asset::Issued {
            code: code.to_string(),
            issuer,
        })
    }
}

impl Default for AssetResolver {
    fn default() -> Self {
        Self::new(NATIVE_ASSET_CODE)
    }
}

impl From<&NetworkConfig> for AssetResolver {
    fn from(config: &NetworkConfig) -> Self {
        Self::new(config.native_code.clone())
    }
}

/// One-shot resolution against the default native code.
pub fn resolve_asset(code: &str, issuer: Option<&str>) -> Result<Asset, RemitError> {
    AssetResolver::default().resolve(code, issuer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Keypair;

    fn issuer() -> String {
        Keypair::from_seed(&[3u8; 32]).address().to_string()
    }

    #[test]
    fn native_code_is_case_insensitive() {
        assert_eq!(resolve_asset("XLM", None).unwrap(), Asset::Native);
        assert_eq!(resolve_asset("xlm", None).unwrap(), Asset::Native);
    }

    #[test]
    fn empty_code_means_native() {
        assert_eq!(resolve_asset("", None).unwrap(), Asset::Native);
    }

    #[test]
    fn native_ignores_issuer() {
        assert_eq!(
            resolve_asset("XLM", Some(&issuer())).unwrap(),
            Asset::Native
        );
    }

    #[test]
    fn issued_asset_requires_issuer() {
        let err = resolve_asset("USDC", None).unwrap_err();
        assert!(matches!(err, RemitError::InvalidAsset { ref code, .. } if code == "USDC"));
        assert!(resolve_asset("USDC", Some("  ")).is_err());
    }

    #[test]
    fn issued_asset_resolves() {
        let iss = issuer();
        let asset = resolve_asset("USDC", Some(&iss)).unwrap();
        assert_eq!(
            asset,
            Asset::Issued {
                code: "USDC".into(),
                issuer: iss.parse().unwrap()
            }
        );
        assert_eq!(asset.code("XLM"), "USDC");
        assert!(!asset.is_native());
    }

    #[test]
    fn rejects_bad_codes_and_issuers() {
        let iss = issuer();
        assert!(resolve_asset("THIRTEENCHARS", Some(&iss)).is_err());
        assert!(resolve_asset("US-D", Some(&iss)).is_err());
        assert!(resolve_asset("USD", Some("not-an-address")).is_err());
    }

    #[test]
    fn custom_native_code() {
        let resolver = AssetResolver::new("PI");
        assert_eq!(resolver.resolve("pi", None).unwrap(), Asset::Native);
        assert!(resolver.resolve("XLM", None).is_err());
    }
}
