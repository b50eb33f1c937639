use std::fmt;
use std::time::Duration;

use progress_core::model::{ModuleId, ProgressUpdate};
use progress_core::selectors;
use services::{Clock, EngineConfig, ProgressEngine};
use storage::HttpBackendConfig;
use tracing::{debug, info};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidModuleId { raw: String },
    MissingApiUrl,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidModuleId { raw } => write!(f, "invalid --module value: {raw:?}"),
            ArgsError::MissingApiUrl => {
                write!(f, "no API url: pass --api-url or set LEARN_PROGRESS_API_URL")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_number<T: std::str::FromStr>(raw: String, flag: &'static str) -> Result<T, ArgsError> {
    raw.trim()
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw })
}

fn parse_module(raw: String) -> Result<ModuleId, ArgsError> {
    ModuleId::new(raw.clone()).ok_or(ArgsError::InvalidModuleId { raw })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- snapshot [connection]");
    eprintln!("  cargo run -p app -- update   --lesson <id> (--progress <0..1> | --percent <0..100>)");
    eprintln!("                               [--time <secs>] [--scroll <pos>] [--section <name>]");
    eprintln!("                               [--module <id>] [connection]");
    eprintln!("  cargo run -p app -- reset    --lesson <id> [--module <id>] [connection]");
    eprintln!("  cargo run -p app -- lesson   --lesson <id> [connection]");
    eprintln!("  cargo run -p app -- resume   --module <id> [connection]");
    eprintln!();
    eprintln!("Connection:");
    eprintln!("  --api-url <url> --token <token> --timeout <secs>");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LEARN_PROGRESS_API_URL, LEARN_PROGRESS_API_TOKEN, LEARN_PROGRESS_TIMEOUT_SECS,");
    eprintln!("  LEARN_PROGRESS_RETRY_AFTER_SECS, LEARN_DEFAULT_MODULE_ID, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Snapshot,
    Update,
    Reset,
    Lesson,
    Resume,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "snapshot" => Some(Self::Snapshot),
            "update" => Some(Self::Update),
            "reset" => Some(Self::Reset),
            "lesson" => Some(Self::Lesson),
            "resume" => Some(Self::Resume),
            _ => None,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
struct Args {
    api_url: Option<String>,
    token: Option<String>,
    timeout: Option<Duration>,
    lesson: Option<String>,
    module: Option<ModuleId>,
    progress: Option<f64>,
    percent: Option<f64>,
    time_spent: u64,
    scroll: Option<f64>,
    section: Option<String>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--api-url" => parsed.api_url = Some(require_value(args, "--api-url")?),
                "--token" => parsed.token = Some(require_value(args, "--token")?),
                "--timeout" => {
                    let secs: u64 = parse_number(require_value(args, "--timeout")?, "--timeout")?;
                    parsed.timeout = Some(Duration::from_secs(secs));
                }
                "--lesson" => parsed.lesson = Some(require_value(args, "--lesson")?),
                "--module" => parsed.module = Some(parse_module(require_value(args, "--module")?)?),
                "--progress" => {
                    parsed.progress =
                        Some(parse_number(require_value(args, "--progress")?, "--progress")?);
                }
                "--percent" => {
                    parsed.percent =
                        Some(parse_number(require_value(args, "--percent")?, "--percent")?);
                }
                "--time" => parsed.time_spent = parse_number(require_value(args, "--time")?, "--time")?,
                "--scroll" => {
                    parsed.scroll = Some(parse_number(require_value(args, "--scroll")?, "--scroll")?);
                }
                "--section" => parsed.section = Some(require_value(args, "--section")?),
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(parsed)
    }

    fn lesson(&self) -> Result<&str, ArgsError> {
        self.lesson
            .as_deref()
            .ok_or(ArgsError::MissingFlag { flag: "--lesson" })
    }

    fn module(&self) -> Result<&ModuleId, ArgsError> {
        self.module
            .as_ref()
            .ok_or(ArgsError::MissingFlag { flag: "--module" })
    }

    fn update(&self) -> Result<ProgressUpdate, ArgsError> {
        let update = ProgressUpdate {
            progress: self.progress,
            completion_percentage: self.percent,
            time_spent_delta: self.time_spent,
            scroll_position: self.scroll,
            last_viewed_section: self.section.clone(),
            module_id: self.module.clone(),
        };
        if update.progress.is_none() && update.completion_percentage.is_none() {
            return Err(ArgsError::MissingFlag { flag: "--progress" });
        }
        Ok(update)
    }

    /// Environment first, flags on top.
    fn http_config(&self) -> Result<HttpBackendConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.api_url {
            Some(url) => {
                let from_env = HttpBackendConfig::from_env()?;
                let mut config = HttpBackendConfig::new(url)?;
                if let Some(env) = from_env {
                    config.timeout = env.timeout;
                    config.api_token = env.api_token;
                }
                config
            }
            None => HttpBackendConfig::from_env()?.ok_or(ArgsError::MissingApiUrl)?,
        };
        if let Some(token) = &self.token {
            config.api_token = Some(token.clone());
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        Ok(config)
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None | Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let mut iter = argv.into_iter().skip(1);
    let parsed = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let mut config = EngineConfig::from_env()?;
    if let Some(timeout) = parsed.timeout {
        config.request_timeout = timeout;
    }
    let http = parsed.http_config()?;
    info!(api = %http.base_url, ?cmd, "starting progress engine");
    let engine = ProgressEngine::http(Clock::default(), http, config)?;
    let progress = engine.progress();

    match cmd {
        Command::Snapshot => {
            let snapshot = progress.refresh_snapshot().await?;
            debug!(
                global_percent = selectors::select_global_percent(Some(&snapshot)),
                streak_days = selectors::select_streak_days(Some(&snapshot)),
                "snapshot loaded"
            );
            print_json(&*snapshot)
        }
        Command::Update => {
            let record = progress
                .update_lesson_progress(parsed.lesson()?, parsed.update()?)
                .await?;
            print_json(&record)
        }
        Command::Reset => {
            let record = progress
                .reset_lesson_progress(parsed.lesson()?, parsed.module.clone())
                .await?;
            print_json(&record)
        }
        Command::Lesson => {
            let record = progress.lesson_progress(parsed.lesson()?).await?;
            print_json(&record)
        }
        Command::Resume => {
            let point = progress.module_resume_point(parsed.module()?).await?;
            print_json(&point)
        }
    }
}

/// The `RUST_LOG` directives when they parse, otherwise `info`.
fn log_filter(rust_log: Option<&str>) -> tracing_subscriber::EnvFilter {
    rust_log
        .and_then(|raw| tracing_subscriber::EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("info"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
