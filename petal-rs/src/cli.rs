//! Command-line argument parsing.
//!
//! Usage:
//!   petal [-t<secs>] [-f<config>] [-c] [<script>|-]
//!   petal [-t<secs>] [-f<config>] [-c] -e<program>

use std::path::PathBuf;
use std::time::Duration;

pub const USAGE: &str = "Usage: petal [-t<secs>] [-f<config>] [-c] [<script>|-]\n       \
                         petal [-t<secs>] [-f<config>] [-c] -e<program>";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Execution timeout override (`-t<secs>`).
    pub timeout: Option<Duration>,
    /// Config-file specification.
    pub config: ConfigFile,
    /// Validate only, do not execute (`-c`).
    pub check_only: bool,
    /// Where the program text comes from.
    pub source: ScriptSource,
}

/// How to choose the config file.
#[derive(Debug, Default, PartialEq)]
pub enum ConfigFile {
    /// Search `./petal.conf`, then `~/.petal.conf` (default).
    #[default]
    Search,
    /// `-f` with no file argument: skip config.
    Skip,
    /// `-f<file>`: load this specific file.
    Explicit(PathBuf),
}

/// Where to read the program from.
#[derive(Debug, Default, PartialEq)]
pub enum ScriptSource {
    /// No positional argument, or `-`.
    #[default]
    Stdin,
    File(PathBuf),
    /// `-e<program>`.
    Inline(String),
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut inline: Option<String> = None;
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // `--` ends flag processing.
        if arg == "--" {
            i += 1;
            positional.extend(argv[i..].iter().cloned());
            break;
        }

        if !arg.starts_with('-') || arg == "-" {
            positional.push(arg.to_owned());
            i += 1;
            continue;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'c' => args.check_only = true,

                // -f[<file>]
                'f' => {
                    if j + 1 < chars.len() {
                        let file: String = chars[j + 1..].iter().collect();
                        args.config = ConfigFile::Explicit(PathBuf::from(file));
                        j = chars.len();
                    } else if i + 1 < argv.len() && !argv[i + 1].starts_with('-') {
                        i += 1;
                        args.config = ConfigFile::Explicit(PathBuf::from(&argv[i]));
                    } else {
                        args.config = ConfigFile::Skip;
                    }
                }

                // -t<secs>
                't' => {
                    let secs = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err("-t requires a number of seconds".to_owned());
                    };
                    args.timeout = Some(parse_secs(&secs)?);
                }

                // -e<program>
                'e' => {
                    let program = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err("-e requires a program argument".to_owned());
                    };
                    inline = Some(program);
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    args.source = match (inline, positional.len()) {
        (Some(program), 0) => ScriptSource::Inline(program),
        (Some(_), _) => return Err("-e cannot be combined with a script file".to_owned()),
        (None, 0) => ScriptSource::Stdin,
        (None, 1) if positional[0] == "-" => ScriptSource::Stdin,
        (None, 1) => ScriptSource::File(PathBuf::from(positional.remove(0))),
        (None, n) => return Err(format!("too many arguments ({n})")),
    };

    Ok(args)
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    s.parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| format!("invalid timeout: {s}"))
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Search for a config file in the standard locations.
/// Returns the first path that exists, or `None`.
pub fn find_config() -> Option<PathBuf> {
    let mut candidates = vec![PathBuf::from("./petal.conf")];
    if let Ok(home) = std::env::var("HOME") {
        candidates.push(PathBuf::from(home).join(".petal.conf"));
    }
    candidates.into_iter().find(|p| p.exists())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
