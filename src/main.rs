use clap::{Parser, Subcommand};
use colored::Colorize;
use pysandbox::config::Config;
use pysandbox::service::{self, Status};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pysandbox")]
#[command(about = "Validate and run untrusted Python scripts in a resource-limited sandbox.")]
#[command(version)]
struct Cli {
    /// Config file [default: ~/.pysandbox/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and execute a script, printing the JSON response
    Run {
        /// Script file; reads stdin when omitted or "-"
        file: Option<PathBuf>,
        /// Treat the input as a JSON request body: {"script": "..."}
        #[arg(long)]
        request: bool,
    },
    /// Validate a script without running it
    Check {
        /// Script file; reads stdin when omitted or "-"
        file: Option<PathBuf>,
    },
    /// Show the capability policy
    Policy,
    /// Show configuration
    Config,
    /// Print a liveness status
    Health,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_input(file: Option<&Path>) -> std::io::Result<String> {
    match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path),
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn exit_code(status: Status) -> i32 {
    match status {
        Status::Ok => 0,
        Status::BadRequest => 1,
        Status::Internal => 2,
    }
}

fn run_script(cfg: &Config, file: Option<&Path>, request: bool) -> i32 {
    let input = match read_input(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} Failed to read input: {}", "Error:".red(), e);
            return exit_code(Status::Internal);
        }
    };

    let sandbox = cfg.sandbox();
    let validator = sandbox.validator();
    let outcome = if request {
        service::parse_request(&input)
            .and_then(|script| service::execute(validator, &sandbox, &script))
    } else {
        service::execute(validator, &sandbox, &input)
    };

    let response = service::respond(outcome);
    println!("{}", response.body);
    exit_code(response.status)
}

fn check_script(cfg: &Config, file: Option<&Path>) -> i32 {
    let script = match read_input(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} Failed to read input: {}", "Error:".red(), e);
            return 2;
        }
    };

    let outcome = cfg.validator().check(&script);
    if outcome.accepted {
        println!("{}", "accepted".green().bold());
        0
    } else {
        println!("{} {}", "rejected:".red().bold(), outcome.reason);
        1
    }
}

fn show_policy(cfg: &Config) {
    let validator = cfg.validator();
    let policy = validator.policy();
    let join = |set: &std::collections::BTreeSet<String>| {
        set.iter().cloned().collect::<Vec<_>>().join(", ")
    };

    println!("{}", "Capability policy:".bold());
    println!();
    println!("  {} {}", "allowed imports:".cyan(), join(&policy.allowed_imports));
    println!("  {} {}", "denied symbols:".cyan(), join(&policy.denied_symbols));
    println!("  {} {}", "blocked calls:".cyan(), join(&policy.dynamic_calls));
    println!("  {} {}", "blocked methods:".cyan(), join(&policy.spawn_methods));
    let mode = if policy.strict_imports {
        "strict (allow-list only)"
    } else {
        "permissive (unlisted public modules allowed)"
    };
    println!("  {} {}", "import mode:".cyan(), mode);
}

fn main() {
    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    init_logging(&cfg.logging.level);

    let code = match cli.command {
        Commands::Run { file, request } => run_script(&cfg, file.as_deref(), request),
        Commands::Check { file } => check_script(&cfg, file.as_deref()),
        Commands::Policy => {
            show_policy(&cfg);
            0
        }
        Commands::Config => {
            println!("{}", "Current configuration:".bold());
            println!();
            match cfg.to_toml() {
                Ok(s) => {
                    println!("{}", s);
                    0
                }
                Err(e) => {
                    eprintln!("Error serializing config: {}", e);
                    2
                }
            }
        }
        Commands::Health => {
            println!("{}", service::health());
            0
        }
    };
    std::process::exit(code);
}
