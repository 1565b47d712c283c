//! Device decoder registry.
//!
//! Resolution order: device profile rules first (in registration order), then
//! the port binding. The registry is built once and then shared read-only.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RegistryConfig;
use crate::decoder::Decoder;
use crate::error::{Error, Result};

/// How a device profile name is matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileMatch {
    Exact(String),
    Contains(String),
}

impl ProfileMatch {
    pub fn matches(&self, profile: &str) -> bool {
        match self {
            ProfileMatch::Exact(name) => profile == name,
            ProfileMatch::Contains(part) => profile.contains(part.as_str()),
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    profiles: Vec<(ProfileMatch, Arc<dyn Decoder>)>,
    ports: HashMap<u8, Arc<dyn Decoder>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in device bindings
    pub fn builtin() -> Self {
        Self::from_config(&RegistryConfig::default())
    }

    /// Build from an already validated registry config
    pub fn from_config(config: &RegistryConfig) -> Self {
        let mut registry = Self::new();
        for rule in &config.profiles {
            registry.register_profile(rule.to_match(), rule.decoder.build());
        }
        for binding in &config.ports {
            registry.register_port(binding.port, binding.decoder.build());
        }
        registry
    }

    pub fn register_profile(&mut self, rule: ProfileMatch, decoder: Arc<dyn Decoder>) -> &mut Self {
        self.profiles.push((rule, decoder));
        self
    }

    /// Bind a port; a later binding replaces an earlier one
    pub fn register_port(&mut self, port: u8, decoder: Arc<dyn Decoder>) -> &mut Self {
        self.ports.insert(port, decoder);
        self
    }

    /// Pick the decoder for a device profile and/or port
    pub fn resolve(&self, profile: Option<&str>, port: Option<u8>) -> Option<&dyn Decoder> {
        let by_profile = profile.and_then(|name| {
            self.profiles
                .iter()
                .find(|(rule, _)| rule.matches(name))
                .map(|(_, decoder)| decoder.as_ref())
        });

        by_profile.or_else(|| port.and_then(|p| self.ports.get(&p)).map(|d| d.as_ref()))
    }

    /// Like `resolve`, but reports a miss as `UnresolvedDecoder`
    pub fn require(&self, profile: Option<&str>, port: Option<u8>) -> Result<&dyn Decoder> {
        self.resolve(profile, port).ok_or_else(|| Error::UnresolvedDecoder {
            profile: profile.map(str::to_string),
            port,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty() && self.ports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{Dds75Lb, Sw3l};

    #[test]
    fn test_builtin_resolution() {
        let registry = Registry::builtin();

        assert_eq!(registry.resolve(Some("SW3L"), Some(2)).unwrap().name(), "SW3L");
        assert_eq!(
            registry
                .resolve(Some("Makerfabs Soil Moisture Sensor"), Some(2))
                .unwrap()
                .name(),
            "Makerfabs-Soil"
        );
        assert_eq!(registry.resolve(None, Some(2)).unwrap().name(), "DDS75-LB");
        assert_eq!(registry.resolve(None, Some(85)).unwrap().name(), "EM500-UDL");
    }

    #[test]
    fn test_exact_match_is_exact() {
        let registry = Registry::builtin();
        // "SW3L-v2" is not "SW3L"; falls back to the port binding
        assert_eq!(registry.resolve(Some("SW3L-v2"), Some(2)).unwrap().name(), "DDS75-LB");
        assert!(registry.resolve(Some("SW3L-v2"), Some(10)).is_none());
    }

    #[test]
    fn test_unresolved() {
        let registry = Registry::builtin();
        assert!(registry.resolve(None, None).is_none());
        assert!(registry.resolve(Some("Unknown"), Some(99)).is_none());
        assert!(matches!(
            registry.require(Some("Unknown"), Some(99)),
            Err(Error::UnresolvedDecoder { port: Some(99), .. })
        ));
    }

    #[test]
    fn test_manual_registration() {
        let mut registry = Registry::new();
        assert!(registry.is_empty());

        registry
            .register_profile(ProfileMatch::Exact("flow".into()), Arc::new(Sw3l))
            .register_port(7, Arc::new(Dds75Lb));

        assert_eq!(registry.resolve(Some("flow"), None).unwrap().name(), "SW3L");
        assert_eq!(registry.resolve(None, Some(7)).unwrap().name(), "DDS75-LB");
        assert!(registry.resolve(None, Some(2)).is_none());
    }
}
