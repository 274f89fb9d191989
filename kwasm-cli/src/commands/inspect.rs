//! Inspect command - report what a module imports and exports.

use anyhow::{Context, Result};
use kwasm_host::runtime::ModuleItem;
use kwasm_host::{BridgeConfig, WasmRuntime};
use std::path::Path;

/// Run the inspect command.
pub async fn run(module: &Path, json: bool) -> Result<()> {
    let bytes = tokio::fs::read(module)
        .await
        .with_context(|| format!("Failed to read {}", module.display()))?;
    let name = module
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("module")
        .to_string();

    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let runtime = WasmRuntime::new(BridgeConfig::default().with_cache(false))?;
        let compiled = runtime.compile(&name, &bytes)?;
        Ok(runtime.inspect(&compiled))
    })
    .await
    .context("Inspect task panicked")??;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Module: {}", report.name);
    println!("========{}", "=".repeat(report.name.len()));
    println!();
    println!("Bridge:");
    println!("  message import:   {}", yes_no(report.uses_bridge));
    println!("  shared memory:    {}", yes_no(report.shared_memory));
    println!("  reserve space:    {}", yes_no(report.reserve_space));
    println!("  worker entry:     {}", yes_no(report.worker_entry));
    println!("  main entry:       {}", yes_no(report.main_entry));
    println!();
    print_items("Imports", &report.imports);
    println!();
    print_items("Exports", &report.exports);

    Ok(())
}

fn print_items(title: &str, items: &[ModuleItem]) {
    println!("{title} ({}):", items.len());
    for item in items {
        if item.module.is_empty() {
            println!("  {:<7} {}", item.kind, item.name);
        } else {
            println!("  {:<7} {}.{}", item.kind, item.module, item.name);
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}
