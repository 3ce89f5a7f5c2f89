use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::{self, ExitCode};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use puainstall::cleanup::{CLEANUP_DIRECTIVE, CleanupAgent, SystemLiveness, spawn_detached};
use puainstall::fs::{DiskFs, FileSystem};
use puainstall::installer::{InstallOutcome, PuaInstaller};
use puainstall::layout::DataLayout;
use puainstall::log::LogContext;
use puainstall::settings::Settings;
use puainstall::tool::ProcessCompiler;

const EXIT_OK: u8 = 0;
const EXIT_FATAL: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_CANCELLED: u8 = 3;

#[derive(Debug)]
enum Action {
    Install(PathBuf),
    Migrate { target: PathBuf, legacy: Vec<PathBuf> },
    Reset,
    Cleanup(u32),
}

#[derive(Debug)]
struct Args {
    config: Option<PathBuf>,
    action: Action,
}

fn print_help(exe: &str) {
    eprintln!("usage: {exe} [--config <file>] <command>");
    eprintln!();
    eprintln!("commands:");
    eprintln!("  install <definitions.xml>            merge definitions and rebuild the tables");
    eprintln!("  migrate <target.xml> <legacy.xml>... fold legacy files into target, then install");
    eprintln!("  reset                                restore the data directory to its original state");
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut config = None;
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().ok_or("--config needs a file")?;
                config = Some(PathBuf::from(path));
            }
            CLEANUP_DIRECTIVE | "-cleanup" => {
                let pid = iter.next().ok_or("--cleanup needs a process id")?;
                let pid = pid.parse::<u32>().map_err(|e| format!("invalid process id '{pid}': {e}"))?;
                return Ok(Args { config, action: Action::Cleanup(pid) });
            }
            _ => rest.push(arg.clone()),
        }
    }
    let action = match rest.split_first() {
        Some((command, operands)) => match (command.as_str(), operands) {
            ("install", [definitions]) => Action::Install(PathBuf::from(definitions)),
            ("migrate", [target, legacy @ ..]) if !legacy.is_empty() => Action::Migrate {
                target: PathBuf::from(target),
                legacy: legacy.iter().map(PathBuf::from).collect(),
            },
            ("reset", []) => Action::Reset,
            (other, _) => return Err(format!("unknown command or wrong operands: {other}")),
        },
        None => return Err("no command given".to_string()),
    };
    Ok(Args { config, action })
}

fn build_log(settings: &Settings) -> puainstall::Result<LogContext> {
    let log = match &settings.log.file {
        Some(path) => LogContext::to_file(path)?,
        None => LogContext::new(),
    };
    Ok(log.echo_errors(settings.log.echo_errors).verbose(!settings.log.quiet))
}

/// Asks whether to try again after a locked-file failure. End of input means cancel.
fn ask_retry() -> bool {
    eprint!("Files in the Unicode data directory are in use by another program. Close it, then [r]etry or [c]ancel? ");
    let _ = io::stderr().flush();
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(0) | Err(_) => false,
        Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "r" | "retry" | "y" | "yes"),
    }
}

fn run_with_retry(mut attempt: impl FnMut() -> InstallOutcome) -> ExitCode {
    loop {
        match attempt() {
            InstallOutcome::Ok => return ExitCode::from(EXIT_OK),
            InstallOutcome::Fatal(message) => {
                error!(%message, "install failed");
                eprintln!("{message}");
                return ExitCode::from(EXIT_FATAL);
            }
            InstallOutcome::Locked => {
                if !ask_retry() {
                    return ExitCode::from(EXIT_CANCELLED);
                }
                info!("retrying after locked data directory");
            }
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let exe = env::args().next().unwrap_or_else(|| "puainstall".to_string());
    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help(&exe);
        return ExitCode::from(EXIT_OK);
    }
    let parsed = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{message}");
            print_help(&exe);
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let settings = match Settings::load(parsed.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };
    let log = match build_log(&settings) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };
    let layout = DataLayout::new(&settings);
    let fs = DiskFs;

    if let Action::Cleanup(pid) = parsed.action {
        let report = CleanupAgent::new(&fs, &SystemLiveness, &log, &layout.manifest)
            .with_timing(settings.cleanup.poll_interval(), settings.cleanup.ceiling())
            .run(pid);
        info!(deleted = report.deleted, failed = report.failed, gave_up = report.gave_up, "cleanup finished");
        return ExitCode::from(EXIT_OK);
    }

    let compiler = ProcessCompiler::new(&settings.compiler);
    let installer = PuaInstaller::new(&fs, &compiler, &layout, &log).configured(&settings);
    let code = match &parsed.action {
        Action::Install(definitions) => run_with_retry(|| {
            let result = installer.install_file(definitions);
            if let Ok(summary) = &result {
                println!(
                    "Installed {} definitions ({} replaced existing overrides)",
                    summary.definitions, summary.merge.replaced
                );
            }
            InstallOutcome::from(result)
        }),
        Action::Migrate { target, legacy } => run_with_retry(|| {
            let result = installer.migrate(legacy, target);
            if let Ok(summary) = &result {
                println!("Migrated {} definitions into {}", summary.definitions, target.display());
            }
            InstallOutcome::from(result)
        }),
        Action::Reset => run_with_retry(|| {
            let result = installer.reset();
            if let Ok(restored) = &result {
                println!("Restored {restored} file(s) to their original state");
            }
            InstallOutcome::from(result)
        }),
        Action::Cleanup(_) => ExitCode::from(EXIT_OK),
    };

    if fs.len(&layout.manifest).is_some_and(|len| len > 0) {
        let agent_args = parsed
            .config
            .iter()
            .flat_map(|c| ["--config".to_string(), c.display().to_string()])
            .collect::<Vec<String>>();
        let started = env::current_exe()
            .map_err(|e| e.to_string())
            .and_then(|exe| spawn_detached(&exe, process::id(), &agent_args).map_err(|e| e.to_string()));
        if let Err(e) = started {
            log.error(format!("Could not start the cleanup agent: {e}"));
        }
    }
    code
}
