mod error;
mod stack_file;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use vs_infra::{GuestConfigService, ProviderConfig, compose_stack};

use crate::error::{Result, SynthError};
use crate::stack_file::StackFile;

/// Synthesize vSphere VM definitions into Terraform JSON.
#[derive(Debug, Parser)]
#[command(name = "vs-synth", version)]
struct Cli {
    /// YAML stack file describing the VMs.
    stack_file: PathBuf,

    /// Output directory; the stack lands in `<output>/stacks/<stack>/cdk.tf.json`.
    #[arg(short, long, env = "VS_SYNTH_OUTPUT", default_value = "cdktf.out")]
    output: PathBuf,

    /// Print the synthesized JSON to stdout instead of writing it.
    #[arg(long)]
    stdout: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    // Loads .env; must run before clap reads VS_SYNTH_OUTPUT
    let provider = ProviderConfig::from_env();
    tracing::debug!(?provider, "provider config loaded");

    let cli = Cli::parse();
    match run(&cli, &provider) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "synth failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, provider: &ProviderConfig) -> Result<()> {
    let (stack_name, vms) = StackFile::load(&cli.stack_file)?.into_specs();
    let guest = GuestConfigService::with_builtin_template()?;

    let outcome = compose_stack(&stack_name, provider, &vms, &guest);
    let json = outcome.stack.to_json_pretty()?;

    if cli.stdout {
        println!("{json}");
    } else {
        let path = write_stack(&cli.output, &stack_name, &json)?;
        tracing::info!(path = %path.display(), vms = outcome.composed.len(), "stack written");
    }

    for vm in &outcome.composed {
        tracing::info!(vm = %vm.name, output = %vm.ip_output, "vm ready");
    }

    if !outcome.is_success() {
        for failure in &outcome.failures {
            tracing::error!(vm = %failure.vm, error = %failure.error, "vm failed");
        }
        return Err(SynthError::VmsFailed(
            outcome.failures.into_iter().map(|f| f.vm).collect(),
        ));
    }
    Ok(())
}

/// Write `json` to `<output>/stacks/<stack>/cdk.tf.json`.
fn write_stack(output: &Path, stack_name: &str, json: &str) -> Result<PathBuf> {
    let dir = output
        .join("stacks")
        .join(tf_graph::block_label(&[stack_name]));
    std::fs::create_dir_all(&dir).map_err(|source| SynthError::Write {
        path: dir.clone(),
        source,
    })?;

    let path = dir.join("cdk.tf.json");
    std::fs::write(&path, json).map_err(|source| SynthError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
