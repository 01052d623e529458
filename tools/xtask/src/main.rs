//! Workspace automation tasks.
//!
//! Run with: `cargo xtask <command>`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::Command;

const CRATE_PREFIX: &str = "scanbox-";
const REQUIRED_LINTS: [&str; 2] = ["#![forbid(unsafe_code)]", "#![deny(missing_docs)]"];

#[derive(Parser)]
#[command(name = "xtask", about = "Scanbox workspace automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all CI checks locally
    Ci,
    /// Validate workspace conventions
    Lint,
    /// Generate coverage report
    Coverage,
    /// Write the custom resource definitions to a YAML file
    Crds {
        /// Output file
        #[arg(long, default_value = "deploy/crds.yaml")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci => run_ci(),
        Commands::Lint => run_lint(),
        Commands::Coverage => run_coverage(),
        Commands::Crds { out } => run_crds(&out),
    }
}

fn run_ci() -> Result<()> {
    println!("Running CI checks...\n");

    run_cmd("cargo", &["fmt", "--check"])?;
    run_cmd("cargo", &["clippy", "--workspace", "--", "-D", "warnings"])?;
    run_cmd("cargo", &["test", "--workspace"])?;
    run_cmd("cargo", &["doc", "--workspace", "--no-deps"])?;
    run_lint()?;

    println!("\nAll CI checks passed!");
    Ok(())
}

fn run_lint() -> Result<()> {
    println!("Validating workspace conventions...\n");

    let crates = std::fs::read_dir("crates")?;
    for entry in crates {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(CRATE_PREFIX) {
            anyhow::bail!("Crate '{}' does not follow {}* naming", name, CRATE_PREFIX);
        }

        let lib = entry.path().join("src/lib.rs");
        if lib.exists() {
            check_lints(&lib)?;
        }
    }

    println!("All conventions validated!");
    Ok(())
}

fn check_lints(lib: &Path) -> Result<()> {
    let source =
        std::fs::read_to_string(lib).with_context(|| format!("Failed to read {}", lib.display()))?;
    for lint in REQUIRED_LINTS {
        if !source.contains(lint) {
            anyhow::bail!("{} is missing {}", lib.display(), lint);
        }
    }
    Ok(())
}

fn run_coverage() -> Result<()> {
    run_cmd("cargo", &["llvm-cov", "--workspace", "--html"])?;
    println!("\nCoverage report: target/llvm-cov/html/index.html");
    Ok(())
}

fn run_crds(out: &Path) -> Result<()> {
    let args = ["run", "--quiet", "-p", "scanbox-operator", "--bin", "scanbox_crdgen"];
    println!("$ cargo {}", args.join(" "));
    let output = Command::new("cargo")
        .args(args)
        .output()
        .context("Failed to run scanbox_crdgen")?;
    if !output.status.success() {
        anyhow::bail!(
            "scanbox_crdgen failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    if let Some(dir) = out.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(out, &output.stdout)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!("CRDs written to {}", out.display());
    Ok(())
}

fn run_cmd(cmd: &str, args: &[&str]) -> Result<()> {
    println!("$ {} {}", cmd, args.join(" "));
    let status = Command::new(cmd)
        .args(args)
        .status()
        .with_context(|| format!("Failed to run: {} {}", cmd, args.join(" ")))?;

    if !status.success() {
        anyhow::bail!("Command failed: {} {}", cmd, args.join(" "));
    }
    Ok(())
}
