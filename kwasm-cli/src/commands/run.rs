//! Run command - execute a guest module.

use anyhow::{Context, Result};
use kwasm_core::value::HostValue;
use kwasm_host::{BridgeConfig, Host};
use std::path::Path;

/// Options for the run command.
#[derive(Debug, Default)]
pub struct RunOptions {
    /// Cap on concurrently running workers.
    pub max_workers: Option<u32>,
    /// Disable worker threads.
    pub no_threads: bool,
    /// TLS block size override.
    pub tls_size: Option<u32>,
    /// `NAME=JSON` global properties.
    pub globals: Vec<String>,
}

/// Run the run command.
pub async fn run(module: &Path, options: RunOptions) -> Result<()> {
    if !module.exists() {
        anyhow::bail!("Module not found: {}", module.display());
    }

    let mut config = BridgeConfig::from_env().context("Invalid KWASM_* environment")?;
    if options.no_threads {
        config = config.with_threads(false);
    }
    if let Some(max) = options.max_workers {
        config = config.with_max_workers(max);
    }
    if let Some(size) = options.tls_size {
        config = config.with_tls_size(size);
    }

    let mut builder = Host::builder(config);
    for global in &options.globals {
        let (name, value) = parse_global(global)?;
        builder = builder.global(name, value);
    }

    tracing::info!(module = %module.display(), "Loading guest");
    let host = builder
        .load(module)
        .await
        .with_context(|| format!("Failed to load {}", module.display()))?;

    // Guest code blocks; keep it off the async workers.
    let joined = tokio::task::spawn_blocking(move || -> Result<usize> {
        let result = host.run().map(drop);
        // Workers share the main context's memory, so wait for them either way.
        let joined = host.join_workers();
        result?;
        Ok(joined)
    })
    .await
    .context("Guest task panicked")??;

    tracing::info!(workers = joined, "Guest finished");
    Ok(())
}

/// Parse `NAME=JSON`. A value that is not valid JSON is taken as a string.
fn parse_global(arg: &str) -> Result<(String, HostValue)> {
    let (name, raw) = arg
        .split_once('=')
        .with_context(|| format!("Expected NAME=JSON, got '{arg}'"))?;
    if name.is_empty() {
        anyhow::bail!("Global name is empty in '{arg}'");
    }
    let value = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => HostValue::from_json(&json),
        Err(_) => HostValue::string(raw),
    };
    Ok((name.to_string(), value))
}
