use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use lanternrt::{CModule, IValue, Tensor};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod transfer;

use config::TrainConfig;
use error::{CliError, Result};

#[derive(Parser, Debug)]
#[command(name = "lantern")]
#[command(about = "Drive the lantern tensor runtime from the command line", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the tensors stored in an archive
    Inspect {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Also print every tensor's contents
        #[arg(long)]
        values: bool,
    },

    /// Run a module on tensors taken from an archive
    Forward {
        #[arg(value_name = "MODULE")]
        module: PathBuf,

        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Archive entries to pass, in order (default: every entry)
        #[arg(short, long = "input", value_name = "NAME")]
        inputs: Vec<String>,
    },

    /// Fit a linear probe on precomputed features
    Transfer {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Module mapping images to features
        #[arg(long, value_name = "MODULE")]
        backbone: Option<PathBuf>,

        /// TOML training config
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LANTERN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    tracing::debug!(runtime = lanternrt::runtime_name(), "starting");
    let exit_code = match run(cli.command) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err);
            1
        }
    };
    process::exit(exit_code);
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Inspect { archive, values } => inspect_command(&archive, values),
        Commands::Forward {
            module,
            archive,
            inputs,
        } => forward_command(&module, &archive, &inputs),
        Commands::Transfer {
            archive,
            backbone,
            config,
        } => {
            let config = match config {
                Some(path) => TrainConfig::load(&path)?,
                None => TrainConfig::default(),
            };
            let report = transfer::run(&archive, backbone.as_deref(), &config)?;
            println!(
                "classes={} features={} loss={:.6} test_accuracy={:.2}%",
                report.classes,
                report.features,
                report.final_loss,
                100.0 * report.test_accuracy
            );
            Ok(())
        }
    }
}

fn describe(t: &Tensor) -> Result<String> {
    if !t.defined()? {
        return Ok("undefined".to_string());
    }
    Ok(format!("{:?} {:?} {:?}", t.kind()?, t.size()?, t.device()?))
}

fn inspect_command(archive: &Path, values: bool) -> Result<()> {
    let entries = Tensor::load_multi(archive)?;
    println!("{} ({} tensors, runtime {})", archive.display(), entries.len(), lanternrt::runtime_name());
    for (name, t) in &entries {
        println!("{}: {}", name, describe(t)?);
        if values {
            println!("{}", t.to_string(80)?);
        }
    }
    Ok(())
}

fn forward_command(module: &Path, archive: &Path, inputs: &[String]) -> Result<()> {
    let m = CModule::load(module)?;
    let mut entries = Tensor::load_multi(archive)?;
    let args: Vec<IValue> = if inputs.is_empty() {
        entries.into_iter().map(|(_, t)| IValue::Tensor(t)).collect()
    } else {
        inputs
            .iter()
            .map(|name| -> Result<IValue> {
                let pos = entries
                    .iter()
                    .position(|(n, _)| n == name)
                    .ok_or_else(|| CliError::Missing(name.clone()))?;
                Ok(IValue::Tensor(entries.swap_remove(pos).1))
            })
            .collect::<Result<_>>()?
    };
    let out = m.forward_is(&args)?;
    print_value(&out, 0)
}

fn print_value(value: &IValue, depth: usize) -> Result<()> {
    let pad = "  ".repeat(depth);
    match value {
        IValue::Tensor(t) => {
            println!("{}tensor {}", pad, describe(t)?);
            for line in t.to_string(80)?.lines() {
                println!("{}  {}", pad, line);
            }
        }
        IValue::Int(v) => println!("{}int {}", pad, v),
        IValue::Double(v) => println!("{}double {}", pad, v),
        IValue::Tuple(items) => {
            println!("{}tuple ({})", pad, items.len());
            for item in items {
                print_value(item, depth + 1)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::fs;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn repeated_inputs_keep_their_order() {
        let cli = Cli::try_parse_from(["lantern", "forward", "m.json", "a.lt", "-i", "x", "--input", "w"]).unwrap();
        match cli.command {
            Commands::Forward { inputs, .. } => assert_eq!(inputs, ["x", "w"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn forward_reports_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("id.json");
        fs::write(&module, r#"{"name": "id", "inputs": 1, "body": {"input": 0}}"#).unwrap();
        let archive = dir.path().join("a.lt");
        let x = Tensor::of_slice(&[1.0f64]).unwrap();
        Tensor::save_multi(&[("x", &x)], &archive).unwrap();

        assert!(forward_command(&module, &archive, &["x".to_string()]).is_ok());
        let err = forward_command(&module, &archive, &["y".to_string()]).unwrap_err();
        assert!(matches!(err, CliError::Missing(ref n) if n == "y"));
        assert!(inspect_command(&archive, true).is_ok());
    }
}
