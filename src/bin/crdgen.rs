//! # CRD Generator
//!
//! Prints the `Application` and `DeployResource` CustomResourceDefinitions.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/gitops-sync.yaml
//! cargo run --bin crdgen -- --output config/crd/gitops-sync.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use gitops_sync_controller::crd::{Application, DeployResource};
use kube::core::CustomResourceExt;
use std::fmt::Write as _;
use std::path::PathBuf;

const HEADER: &str = "\
# This file is auto-generated by crdgen
# DO NOT EDIT THIS FILE MANUALLY
# Change the types under src/crd/ and regenerate
";

#[derive(Debug, Parser)]
#[command(name = "crdgen", about = "Generate the GitOps sync controller CRDs")]
struct Args {
    /// Write to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut out = String::from(HEADER);
    for crd in [Application::crd(), DeployResource::crd()] {
        let yaml = serde_yaml::to_string(&crd).context("failed to serialize CRD to YAML")?;
        writeln!(out, "---").context("failed to build output")?;
        out.push_str(&yaml);
    }

    match args.output {
        Some(path) => std::fs::write(&path, out)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{out}"),
    }
    Ok(())
}
