//! Provider name and registry.
//!
//! The set of supported providers is a closed enum so an unregistered name
//! can only come from request input, never from wiring drift. The registry is
//! assembled once at startup and handed to the orchestrators.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::providers::traits::PaymentProvider;

/// Supported payment networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    /// Redirect-based hosted checkout processor.
    HostedCheckout,
    /// Direct card capture processor.
    CardDirect,
    /// On-site/cash desk processing, no external network.
    OnSite,
    /// Legacy capture-only gateway.
    LegacyGateway,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostedCheckout => "hosted_checkout",
            Self::CardDirect => "card_direct",
            Self::OnSite => "on_site",
            Self::LegacyGateway => "legacy_gateway",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "hosted_checkout" => Ok(Self::HostedCheckout),
            "card_direct" => Ok(Self::CardDirect),
            "on_site" => Ok(Self::OnSite),
            "legacy_gateway" => Ok(Self::LegacyGateway),
            other => Err(AppError::UnknownProvider(other.to_string())),
        }
    }
}

/// Name-to-adapter lookup populated at startup.
pub struct ProviderRegistry {
    adapters: HashMap<ProviderName, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(mut self, adapter: Arc<dyn PaymentProvider>) -> Self {
        self.adapters.insert(adapter.name(), adapter);
        self
    }

    /// Resolve an adapter by its registered name.
    pub fn resolve(&self, name: ProviderName) -> AppResult<Arc<dyn PaymentProvider>> {
        self.adapters
            .get(&name)
            .cloned()
            .ok_or_else(|| AppError::UnknownProvider(name.to_string()))
    }

    /// Resolve from request input, rejecting names outside the closed set.
    pub fn resolve_str(&self, name: &str) -> AppResult<Arc<dyn PaymentProvider>> {
        self.resolve(name.parse()?)
    }

    /// Names of the registered adapters, sorted for stable output.
    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().map(|n| n.to_string()).collect();
        names.sort();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_round_trip() {
        for name in [
            ProviderName::HostedCheckout,
            ProviderName::CardDirect,
            ProviderName::OnSite,
            ProviderName::LegacyGateway,
        ] {
            assert_eq!(name.as_str().parse::<ProviderName>().unwrap(), name);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "spacebucks".parse::<ProviderName>().unwrap_err();
        assert!(matches!(err, AppError::UnknownProvider(ref n) if n == "spacebucks"));
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let registry = ProviderRegistry::new();
        assert!(registry.resolve(ProviderName::OnSite).is_err());
    }
}
