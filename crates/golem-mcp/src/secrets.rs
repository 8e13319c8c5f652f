//! Secret provider: environment-sourced secret store and per-server env
//! overlay (§4.6).

use std::collections::HashMap;

use crate::config::ServerConfig;

const DEFAULT_PREFIX: &str = "GOLEM_MCP_";

fn to_env_prefix(server_name: &str) -> String {
    let upper: String = server_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{upper}_")
}

/// Holds secrets harvested from the process environment and overlays them
/// onto a server's configured environment on demand.
#[derive(Debug, Clone, Default)]
pub struct SecretProvider {
    secrets: HashMap<String, String>,
}

impl SecretProvider {
    /// An empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Harvest every environment variable beginning with `prefix` (default
    /// `GOLEM_MCP_`), storing the suffix as the secret name.
    #[must_use]
    pub fn load_from_env(prefix: Option<&str>) -> Self {
        let prefix = prefix.unwrap_or(DEFAULT_PREFIX);
        let secrets = std::env::vars()
            .filter_map(|(k, v)| k.strip_prefix(prefix).map(|suffix| (suffix.to_string(), v)))
            .collect();
        Self { secrets }
    }

    /// Number of secrets currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Whether no secrets are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Build the environment overlay for `config`: its own `env` map
    /// overlaid with every stored secret named
    /// `<UPPER_SERVER_NAME>_<suffix>`. Never mutates the store.
    #[must_use]
    pub fn build_env(&self, config: &ServerConfig) -> HashMap<String, String> {
        let mut env = config.env.clone();
        let server_prefix = to_env_prefix(&config.name);
        for (name, value) in &self.secrets {
            if let Some(suffix) = name.strip_prefix(&server_prefix) {
                env.insert(suffix.to_string(), value.clone());
            }
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_env_overlays_matching_secrets_over_config_env() {
        let mut provider = SecretProvider::new();
        provider
            .secrets
            .insert("FILESYSTEM_API_KEY".to_string(), "s3cr3t".to_string());
        provider
            .secrets
            .insert("OTHER_TOKEN".to_string(), "unused".to_string());

        let config = ServerConfig::stdio("filesystem", "npx").with_env("EXISTING", "kept");
        let env = provider.build_env(&config);

        assert_eq!(env.get("API_KEY"), Some(&"s3cr3t".to_string()));
        assert_eq!(env.get("EXISTING"), Some(&"kept".to_string()));
        assert!(!env.contains_key("TOKEN"));
    }

    #[test]
    fn build_env_does_not_mutate_store() {
        let provider = SecretProvider::new();
        let config = ServerConfig::stdio("srv", "cmd");
        let before = provider.len();
        let _ = provider.build_env(&config);
        assert_eq!(provider.len(), before);
    }

    #[test]
    fn server_name_non_alnum_is_replaced_with_underscore() {
        assert_eq!(to_env_prefix("my-server"), "MY_SERVER_");
    }
}
