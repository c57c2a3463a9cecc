use std::process::ExitCode;

use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use petal::cli::{self, CliArgs, ConfigFile, ScriptSource};
use petal::config::Config;
use petal::script::{Interpreter, InterpreterConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Diagnostics go to stderr so stdout carries only script output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PETAL_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("petal: {e}");
            eprintln!("{}", cli::USAGE);
            return ExitCode::from(2);
        }
    };

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("petal: {e}");
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` when the script ran (or validated) and failed.
async fn run(args: CliArgs) -> std::io::Result<bool> {
    // ── Config ────────────────────────────────────────────────────────────────
    let config_path = match args.config {
        ConfigFile::Skip => None,
        ConfigFile::Explicit(path) => Some(path),
        ConfigFile::Search => cli::find_config(),
    };
    let config = match config_path {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            let (config, errors) = Config::load_file(&path)?;
            for e in errors {
                warn!(path = %path.display(), "config {e}");
            }
            config
        }
        None => Config::new(),
    };

    let mut settings = config.interpreter_config(InterpreterConfig::default());
    if let Some(timeout) = args.timeout {
        settings.timeout = timeout;
    }

    // ── Source ────────────────────────────────────────────────────────────────
    let source = match args.source {
        ScriptSource::Inline(program) => program,
        ScriptSource::File(path) => tokio::fs::read_to_string(&path).await?,
        ScriptSource::Stdin => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            text
        }
    };

    let interp = Interpreter::with_config(settings);

    if args.check_only {
        let parsed = interp.validate(&source);
        if let Some(error) = parsed.error() {
            eprintln!("{error}");
            return Ok(false);
        }
        return Ok(true);
    }

    // ── Execute ───────────────────────────────────────────────────────────────
    config.install(&interp);
    let result = interp.execute(&source).await;

    let log = interp.get_log();
    match result.error() {
        None => {
            print!("{log}");
            let value = result.value().into_value();
            if !value.is_null() {
                println!("{value}");
            }
            Ok(true)
        }
        Some(error) => {
            // The log already ends with the error line; keep stdout to what
            // the script printed and report the error once, on stderr.
            print!("{}", log.strip_suffix(&format!("{error}\n")).unwrap_or(&log));
            eprintln!("{error}");
            Ok(false)
        }
    }
}
