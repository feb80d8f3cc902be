//! Shared HTTP transport for all item pipelines.

use reportharvest_shared::{HarvestError, HarvestSettings, Result};
use reqwest::Client;
use tracing::info;

/// Maximum number of redirects followed by either phase.
const MAX_REDIRECTS: usize = 5;

/// Build the single client shared by every item pipeline.
///
/// The idle pool is sized to the worker count so each concurrent pipeline can
/// keep its connection alive between the two phases.
pub fn build_client(settings: &HarvestSettings) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(settings.user_agent.as_str())
        .connect_timeout(settings.connect_timeout)
        .read_timeout(settings.read_timeout)
        .pool_max_idle_per_host(settings.workers)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));

    if let Some(proxy_url) = &settings.proxy {
        let proxy = reqwest::Proxy::all(proxy_url.as_str()).map_err(|e| {
            HarvestError::config(format!("invalid proxy '{proxy_url}': {e}"))
        })?;
        info!(proxy = %proxy_url, "routing requests through proxy");
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportharvest_shared::{AppConfig, SettingsOverrides};

    #[test]
    fn builds_with_defaults() {
        let settings =
            HarvestSettings::resolve(&AppConfig::default(), &SettingsOverrides::default())
                .expect("settings");
        assert!(build_client(&settings).is_ok());
    }

    #[test]
    fn builds_with_socks_proxy() {
        let overrides = SettingsOverrides {
            use_proxy: true,
            ..Default::default()
        };
        let settings =
            HarvestSettings::resolve(&AppConfig::default(), &overrides).expect("settings");
        assert!(build_client(&settings).is_ok());
    }
}
