//! FuzzForge command line interface
//!
//! Exit codes: `0` on a normal run, `-1` for dictionary/grammar/settings
//! configuration errors, `1` for an uncaught engine error.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fuzzforge_engine::{generate_sequences, EngineError, EngineSettings, FuzzingContext};
use fuzzforge_grammar::{CandidateValuesPool, GrammarError, GrammarFile, MutationsDictionary};
use fuzzforge_transport::{parse_token_response, AuthProvider, TokenCache, TokenData};

mod summary;

#[derive(Parser)]
#[command(name = "fuzzforge")]
#[command(about = "FuzzForge - Stateful REST API Fuzzer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short = 'v', long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stateful fuzzing loop against a target service
    Fuzz(FuzzArgs),
}

#[derive(Args)]
struct FuzzArgs {
    /// Grammar file produced by the compiler (JSON)
    #[arg(long)]
    grammar_file: PathBuf,

    /// Mutations dictionary (JSON)
    #[arg(long)]
    dictionary_file: PathBuf,

    /// Engine settings (JSON); defaults apply when omitted
    #[arg(long)]
    settings_file: Option<PathBuf>,

    /// Target service address
    #[arg(long)]
    target_ip: String,

    /// Target service port
    #[arg(long)]
    target_port: u16,

    /// Use plain TCP instead of TLS
    #[arg(long)]
    no_ssl: bool,

    /// Host header / SNI name when it differs from the target ip
    #[arg(long)]
    host: Option<String>,

    /// Auth token file in the provider output format; re-read on refresh
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Override the settings file's wall-clock budget
    #[arg(long)]
    time_budget_hours: Option<f64>,

    /// Override the settings file's worker count
    #[arg(long)]
    fuzzing_jobs: Option<usize>,

    /// Override the settings file's output directory
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

/// Reads the token file on every refresh, so rotated tokens are picked up
/// without restarting the run.
struct FileTokenProvider {
    path: PathBuf,
}

impl AuthProvider for FileTokenProvider {
    fn acquire_token(&self) -> fuzzforge_transport::Result<TokenData> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            fuzzforge_transport::TransportError::AuthFailed(format!(
                "{}: {e}",
                self.path.display()
            ))
        })?;
        parse_token_response(&raw)
    }
}

fn build_settings(args: &FuzzArgs) -> Result<EngineSettings, EngineError> {
    let mut settings = match &args.settings_file {
        Some(path) => EngineSettings::from_file(path)?,
        None => EngineSettings::default(),
    };
    settings.connection.target_ip = args.target_ip.clone();
    settings.connection.target_port = args.target_port;
    settings.connection.use_ssl = !args.no_ssl;
    if args.host.is_some() {
        settings.connection.host = args.host.clone();
    }
    if let Some(budget) = args.time_budget_hours {
        settings.time_budget_hours = budget;
    }
    if let Some(jobs) = args.fuzzing_jobs {
        settings.fuzzing_jobs = jobs;
    }
    if let Some(dir) = &args.output_dir {
        settings.output_dir = dir.clone();
    }
    Ok(settings)
}

async fn run_fuzz(args: &FuzzArgs) -> Result<(), EngineError> {
    let settings = build_settings(args)?;

    let collection = GrammarFile::from_file(&args.grammar_file)?.into_collection()?;
    info!(requests = collection.len(), grammar = %args.grammar_file.display(), "grammar loaded");

    let dictionary = MutationsDictionary::from_file(&args.dictionary_file)?;
    let pool = CandidateValuesPool::from_dictionary(&dictionary);

    let auth = match &args.token_file {
        Some(path) => {
            let provider: Arc<dyn AuthProvider> =
                Arc::new(FileTokenProvider { path: path.clone() });
            TokenCache::new(
                Some(provider),
                std::time::Duration::from_secs(settings.token_refresh_interval_secs),
            )
        }
        None => TokenCache::disabled(),
    };

    let ctx = FuzzingContext::new(collection, pool, settings, auth)?;
    let summary = generate_sequences(&ctx).await?;
    summary::print_summary(&summary);
    Ok(())
}

/// Configuration problems exit with -1; anything else unexpected with 1.
fn exit_code_for(error: &EngineError) -> i32 {
    match error {
        EngineError::Settings(_) => -1,
        EngineError::Grammar(
            GrammarError::InvalidDictionary(_)
            | GrammarError::GrammarParse(_)
            | GrammarError::ProducerConsumerOverlap { .. },
        ) => -1,
        _ => 1,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    let code = match cli.command {
        Commands::Fuzz(args) => match run_fuzz(&args).await {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %e, "fuzzing run failed");
                exit_code_for(&e)
            }
        },
    };
    std::process::exit(code);
}
