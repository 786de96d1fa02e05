//! notes-e2e - launcher and headless scenario runner

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use notes_e2e::config::HarnessConfig;
use notes_e2e::error::E2eResult;
use notes_e2e::playwright::PlaywrightSession;
use notes_e2e::runner::{write_results, ScenarioRunner};
use notes_e2e::supervisor::{RunnerCommand, Supervisor};
use notes_e2e::{Interceptor, TestSpec};

/// End-to-end harness for the notes web client
#[derive(Parser)]
#[command(name = "notes-e2e")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (default: ./notes-e2e.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the app asset, ensure the static server, run the suite (default)
    Launch,

    /// Run the scenarios headlessly against an already reachable app
    Run {
        /// Only scenarios carrying this tag (or whose suite does)
        #[arg(short, long)]
        tag: Option<String>,

        /// Only scenarios whose title contains this text
        #[arg(short, long)]
        scenario: Option<String>,

        /// Directory of YAML suites
        #[arg(long)]
        specs: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match HarnessConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(e.exit_code());
        }
    };
    config.logging.init();

    let code = match cli.command.unwrap_or(Commands::Launch) {
        Commands::Launch => match RunnerCommand::current(cli.config.as_deref()) {
            Ok(runner) => Supervisor::new(config.launch.clone(), runner).launch().await,
            Err(e) => {
                error!("{}", e);
                e.exit_code()
            }
        },
        Commands::Run {
            tag,
            scenario,
            specs,
        } => match run(config, tag, scenario, specs).await {
            Ok(code) => code,
            Err(e) => {
                error!("{}", e);
                e.exit_code()
            }
        },
    };

    std::process::exit(code);
}

async fn run(
    mut config: HarnessConfig,
    tag: Option<String>,
    scenario: Option<String>,
    specs_dir: Option<PathBuf>,
) -> E2eResult<i32> {
    if let Some(dir) = specs_dir {
        config.suite.specs_dir = dir;
    }

    let specs = TestSpec::load_all(&config.suite.specs_dir)?;
    let specs = TestSpec::filter(specs, tag.as_deref(), scenario.as_deref());
    if specs.is_empty() {
        warn!("No scenarios matched the filters");
    }

    let interceptor = Arc::new(Interceptor::new());
    let session = Arc::new(PlaywrightSession::launch(config.browser.clone(), interceptor.clone()).await?);

    let runner = ScenarioRunner::new(session.clone(), interceptor, config.suite.clone());
    let outcome = runner.run_specs(&specs).await;
    drop(runner);

    match Arc::try_unwrap(session) {
        Ok(session) => {
            if let Err(e) = session.close().await {
                warn!("Browser did not close cleanly: {}", e);
            }
        }
        Err(_) => warn!("Browser session still shared at shutdown"),
    }

    let results = outcome?;
    print!("{}", results.summary());
    write_results(&config.suite.output_dir, &results)?;
    info!("{} of {} scenario(s) passed", results.passed, results.total);
    Ok(results.exit_code())
}
