use crate::config::types::SupervisorError;
use crate::core::{Bootstrap, Layout, DEFAULT_NAME};
use crate::exec::{HostImage, Invocation, RestartCoordinator};
use crate::kernel::signal::SignalBridge;
use crate::observability::{logging, ScanLog};
use anyhow::Result;
use clap::{ArgAction, Parser};
use log::{debug, error};
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Basename of the configuration and log files
    #[arg(short = 'c', long = "config-name", default_value = DEFAULT_NAME)]
    config_name: String,

    /// Stay in the foreground and raise verbosity (repeatable)
    #[arg(short = 'd', action = ArgAction::Count)]
    debug: u8,
}

/// Split argv into the options `Cli` understands and everything else.
///
/// Short options are scanned getopt style (`-dc name`, `-cname`, `-dd`).
/// Unknown options, stray operands and a `-c` with no value are set aside
/// so they never abort startup.
fn known_args<I>(args: I) -> (Vec<OsString>, Vec<OsString>)
where
    I: IntoIterator<Item = OsString>,
{
    let mut args = args.into_iter();
    let mut known: Vec<OsString> = args.next().into_iter().collect();
    let mut ignored = Vec::new();

    while let Some(arg) = args.next() {
        let bytes = arg.as_bytes();
        match bytes {
            b"--" => {
                ignored.extend(args.by_ref());
                break;
            }
            b"--help" | b"--version" => known.push(arg),
            b"--config-name" => match args.next() {
                Some(value) => {
                    known.push(arg);
                    known.push(value);
                }
                None => ignored.push(arg),
            },
            _ if bytes.starts_with(b"--config-name=") => known.push(arg),
            [b'-', b'-', ..] => ignored.push(arg),
            [b'-', cluster @ ..] if !cluster.is_empty() => {
                for (i, &flag) in cluster.iter().enumerate() {
                    match flag {
                        b'd' | b'h' | b'V' => known.push(OsString::from_vec(vec![b'-', flag])),
                        b'c' => {
                            let rest = &cluster[i + 1..];
                            let value = if rest.is_empty() {
                                args.next()
                            } else {
                                Some(OsStr::from_bytes(rest).to_os_string())
                            };
                            match value {
                                Some(value) => {
                                    known.push(OsString::from("-c"));
                                    known.push(value);
                                }
                                None => ignored.push(OsString::from("-c")),
                            }
                            break;
                        }
                        _ => ignored.push(OsString::from_vec(vec![b'-', flag])),
                    }
                }
            }
            _ => ignored.push(arg),
        }
    }

    (known, ignored)
}

pub fn run() -> Result<()> {
    // Captured before parsing so a restart re-executes the exact same vector.
    let invocation = Invocation::capture()?;

    let (known, ignored) = known_args(invocation.args_os());
    let cli = match Cli::try_parse_from(known) {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let debug_level = u32::from(cli.debug);
    logging::init(debug_level);
    for arg in &ignored {
        debug!("MAIN -> Ignoring argument {}", arg.to_string_lossy());
    }

    let layout = Layout::installed();
    let scanlog = Arc::new(ScanLog::new());

    let booted = Bootstrap::new(layout.clone(), &cli.config_name, debug_level)
        .with_scanlog(scanlog)
        .run()
        .unwrap_or_else(|e| fatal(e));

    let bridge = SignalBridge::install().unwrap_or_else(|e| fatal(e));

    let restart = RestartCoordinator::new(layout.binary, invocation, Box::new(HostImage));
    let mut supervisor = booted.into_supervisor(bridge.flags(), restart);

    let exit = supervisor.run();
    log::logger().flush();
    std::process::exit(exit.exit_code());
}

/// Report a setup failure as one line and exit 1.
fn fatal(err: SupervisorError) -> ! {
    error!("MAIN -> {}", err);
    log::logger().flush();
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Cli {
        let (known, _) = known_args(args.iter().map(OsString::from));
        Cli::try_parse_from(known).expect("filtered argv parses")
    }

    #[test]
    fn unknown_options_do_not_stop_parsing() {
        let cli = parse(&["opmon", "-x", "-c", "irc", "-d"]);
        assert_eq!(cli.config_name, "irc");
        assert_eq!(cli.debug, 1);
    }

    #[test]
    fn clustered_short_options_follow_getopt() {
        let cli = parse(&["opmon", "-dxd", "-cscan", "stray", "--bogus"]);
        assert_eq!(cli.config_name, "scan");
        assert_eq!(cli.debug, 2);

        let cli = parse(&["opmon", "-dc", "irc"]);
        assert_eq!(cli.config_name, "irc");
        assert_eq!(cli.debug, 1);
    }

    #[test]
    fn missing_config_value_keeps_default_name() {
        let cli = parse(&["opmon", "-d", "-c"]);
        assert_eq!(cli.config_name, DEFAULT_NAME);
        assert_eq!(cli.debug, 1);
    }

    #[test]
    fn ignored_arguments_are_reported() {
        let (known, ignored) = known_args(
            ["opmon", "-x", "--long=1", "-c", "irc", "--", "-d"]
                .iter()
                .map(OsString::from),
        );
        assert_eq!(known, ["opmon", "-c", "irc"].map(OsString::from));
        assert_eq!(ignored, ["-x", "--long=1", "-d"].map(OsString::from));
    }

    #[test]
    fn help_and_version_still_exit_cleanly() {
        for flag in ["--help", "-h", "--version", "-V"] {
            let (known, _) = known_args(["opmon", "-x", flag].iter().map(OsString::from));
            let err = Cli::try_parse_from(known).unwrap_err();
            assert!(matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ));
            assert!(!err.use_stderr());
        }
    }
}
