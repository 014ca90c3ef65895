//! Subcommand handlers

use crate::{Cli, Commands};
use anyhow::{Context, Result};
use proxbox_core::config::detect_default_gateway;
use proxbox_core::{Broker, OpensslKeyCrypto, ProxboxConfig, RegisterRequest};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::info;

/// Load file settings, apply `PROXBOX_*` overrides, then optional detection
pub async fn load_config(path: &Path, detect_gateway: bool) -> Result<ProxboxConfig> {
    let mut config = ProxboxConfig::load_from_file(path)?;
    config.merge_with_env()?;
    if detect_gateway {
        config.gateway_host = detect_default_gateway().await?;
        info!(gateway = %config.gateway_host, "Detected gateway host");
    }
    Ok(config)
}

/// Execute the chosen subcommand and render its result
pub async fn run(cli: &Cli) -> Result<String> {
    let config = load_config(&cli.config, cli.detect_gateway).await?;
    let broker = Broker::new(&config, Arc::new(OpensslKeyCrypto::new()))?;

    match &cli.command {
        Commands::Register { pubkey } => {
            let text = read_input(pubkey).await?;
            let request = RegisterRequest {
                pubkey: Some(String::from_utf8(text).context("Public key is not UTF-8")?),
            };
            render(&broker.register_request(&request).await?)
        }

        Commands::Authenticate {
            identity,
            signature,
        } => {
            let bytes = read_input(signature).await?;
            render(&broker.authenticate_named(identity, &bytes).await?)
        }

        Commands::Leases => render(&broker.leases().await?),

        Commands::Audit => render(&broker.audit().await?),
    }
}

async fn read_input(path: &Path) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    if path == Path::new("-") {
        tokio::io::stdin().read_to_end(&mut buf).await?;
    } else {
        buf = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
    }
    Ok(buf)
}

fn render<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxbox_core::ClusterIdentity;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_config_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proxbox.toml");
        tokio::fs::write(&path, "gateway_host = \"10.1.2.3\"\nbase_port = 9100\n")
            .await
            .unwrap();

        let config = load_config(&path, false).await.unwrap();
        assert_eq!(config.base_port, 9100);
        assert_eq!(config.root_domain, ProxboxConfig::default().root_domain);
    }

    #[tokio::test]
    async fn test_read_input_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sig.bin");
        tokio::fs::write(&path, [0u8, 159, 255]).await.unwrap();
        assert_eq!(read_input(&path).await.unwrap(), vec![0u8, 159, 255]);
    }

    #[tokio::test]
    async fn test_read_input_missing_file_names_path() {
        let err = read_input(Path::new("/nonexistent/key.pub")).await.unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/key.pub"));
    }

    #[test]
    fn test_render_lease_shape() {
        let lease = proxbox_core::PortLease::new(
            ClusterIdentity::parse("calm-river-a1b2c3").unwrap(),
            8890,
            8891,
        );
        let json: serde_json::Value = serde_json::from_str(&render(&lease).unwrap()).unwrap();
        assert_eq!(json["identity"], "calm-river-a1b2c3");
        assert_eq!(json["primary_port"], 8890);
        assert_eq!(json["secondary_port"], 8891);
    }
}
