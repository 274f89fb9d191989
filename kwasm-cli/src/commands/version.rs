//! Version command - show version information.

use anyhow::Result;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the version command.
pub fn run() -> Result<()> {
    println!("kwasm - host bridge for WebAssembly guests");
    println!();
    println!("Version:     {}", VERSION);
    println!(
        "Platform:    {} / {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!();
    println!("Components:");
    println!("  kwasm-core   Errors, host values, object table, wire protocol");
    println!("  kwasm-host   Wasmtime bridge, router, libraries, workers");
    println!("  kwasm-cli    Command-line interface");

    Ok(())
}
