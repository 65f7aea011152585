use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use carton::{Runtime, WaitStatus};

#[derive(Debug, Parser)]
#[command(name = "carton", version, about = "A minimal container runtime")]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a command in a new container.
    #[command(visible_alias = "r")]
    Run {
        /// User and group id the command runs as inside the container.
        #[arg(short, long, value_name = "UID", default_value_t = 0)]
        uid: u32,

        /// Host directory used as the container root filesystem.
        #[arg(short, long, value_name = "PATH")]
        root: PathBuf,

        /// Additional bind mount; DST is taken relative to the new root.
        #[arg(short, long = "volume", value_name = "SRC:DST")]
        volumes: Vec<String>,

        /// Command to run inside the container.
        command: String,

        /// Arguments passed to the command.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
    match cli.command {
        Command::Run {
            uid,
            root,
            volumes,
            command,
            args,
        } => run(uid, root, volumes, command, args),
    }
}

fn run(
    uid: u32,
    root: PathBuf,
    volumes: Vec<String>,
    command: String,
    args: Vec<String>,
) -> ExitCode {
    let mut options = Runtime::options()
        .command(command)
        .args(args)
        .uid(uid)
        .root(root);
    for volume in &volumes {
        let (source, target) = match parse_volume(volume) {
            Ok(v) => v,
            Err(err) => {
                log::error!("{err}");
                return ExitCode::FAILURE;
            }
        };
        options = options.add_volume(source, target);
    }
    let runtime = match options.build() {
        Ok(v) => v,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    match runtime.run() {
        Ok(WaitStatus::Exited(_, code)) => ExitCode::from(code as u8),
        Ok(WaitStatus::Signaled(_, signal, _)) => ExitCode::from((128 + signal as i32) as u8),
        Ok(status) => {
            log::error!("Unexpected container status: {status:?}");
            ExitCode::FAILURE
        }
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Splits `SRC:DST`, rejecting malformed pairs before any side effect.
fn parse_volume(volume: &str) -> Result<(PathBuf, String), String> {
    let (source, target) = volume
        .split_once(':')
        .ok_or_else(|| format!("Invalid volume (expected SRC:DST): {volume}"))?;
    let target = target.trim_start_matches('/');
    if source.is_empty() || target.is_empty() {
        return Err(format!("Invalid volume (expected SRC:DST): {volume}"));
    }
    Ok((PathBuf::from(source), target.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_volume_splits_source_and_target() {
        let (source, target) = parse_volume("/srv/data:/data").unwrap();
        assert_eq!(source, PathBuf::from("/srv/data"));
        assert_eq!(target, "data");
    }

    #[test]
    fn parse_volume_rejects_missing_colon() {
        assert!(parse_volume("/srv/data").is_err());
    }

    #[test]
    fn parse_volume_rejects_empty_parts() {
        assert!(parse_volume(":/data").is_err());
        assert!(parse_volume("/srv/data:").is_err());
        assert!(parse_volume("/srv/data:/").is_err());
    }
}
