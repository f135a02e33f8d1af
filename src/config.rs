//! Host-level configuration. The core itself never reads a file or an
//! environment variable (spec §6); this type exists for `demos/basic_host`
//! and any other hosting binary to deserialize and then pass in explicitly.

use serde::Deserialize;

use crate::resolver::DEFAULT_DEPTH_LIMIT;

/// Knobs a host may want to override. Passed explicitly into
/// `resolver::resolve_with_limit`; never read by the core itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub resolver_depth_limit: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            resolver_depth_limit: DEFAULT_DEPTH_LIMIT,
        }
    }
}

impl CoreConfig {
    /// Parses a TOML document; missing fields fall back to
    /// [`Default::default`] via `#[serde(default)]`.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = CoreConfig::from_toml("").unwrap();
        assert_eq!(cfg.resolver_depth_limit, DEFAULT_DEPTH_LIMIT);
    }

    #[test]
    fn overrides_resolver_depth_limit() {
        let cfg = CoreConfig::from_toml("resolver_depth_limit = 16").unwrap();
        assert_eq!(cfg.resolver_depth_limit, 16);
    }
}
