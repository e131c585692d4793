//! Headless Logs CLI
//!
//! Entry point for the `headless-logs` command-line tool.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use headless_logs::config::default_user_config_path;
use headless_logs::signal::EXIT_CODE_INTERRUPTED;
use headless_logs::{
    http_client, telemetry, EffectiveConfig, HeadlessLogApi, HttpLogApi, LogWatcher,
    SignalHandler, StreamClient, TerminalRenderer, WatchOutcome, WatcherOptions,
};
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Parser)]
#[command(name = "headless-logs")]
#[command(about = "Follow the logs of headless workspace instances", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (default: ~/.config/headless-logs/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Log server base URL
    #[arg(long, global = true)]
    server_url: Option<String>,

    /// Bearer token for the log server
    #[arg(long, global = true, env = "HEADLESS_LOGS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Delay between reconnect attempts in milliseconds
    #[arg(long, global = true)]
    retry_delay_ms: Option<u64>,

    /// Replay the whole stream on reconnect instead of resuming
    #[arg(long, global = true)]
    no_resume: bool,

    /// Emit diagnostics as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream an instance's log to stdout until it finishes
    Watch {
        /// Headless instance ID
        instance_id: String,

        /// Do not color producer error lines
        #[arg(long)]
        no_color: bool,
    },

    /// Print the stream endpoints published for an instance
    Urls {
        /// Headless instance ID
        instance_id: String,
    },

    /// Print the effective configuration
    Config,
}

impl Cli {
    /// CLI flags as the highest-precedence config layer. Absent flags are
    /// left out so lower layers show through.
    fn overrides(&self) -> Option<Value> {
        let mut map = Map::new();
        if let Some(url) = &self.server_url {
            map.insert("server_url".into(), Value::from(url.as_str()));
        }
        if let Some(token) = &self.token {
            map.insert("token".into(), Value::from(token.as_str()));
        }
        if let Some(delay) = self.retry_delay_ms {
            map.insert("retry_delay_ms".into(), Value::from(delay));
        }
        if self.no_resume {
            map.insert("resume".into(), Value::from(false));
        }
        (!map.is_empty()).then_some(Value::Object(map))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(telemetry::DEFAULT_LOG_LEVEL, cli.json_logs);

    let user_path = cli.config.clone().or_else(default_user_config_path);
    let config = match EffectiveConfig::build(user_path.as_deref(), cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    match cli.command {
        Commands::Watch { instance_id, no_color } => run_watch(&config, instance_id, no_color).await,
        Commands::Urls { instance_id } => run_urls(&config, &instance_id).await,
        Commands::Config => match config.to_json() {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}

async fn run_watch(config: &EffectiveConfig, instance_id: String, no_color: bool) -> ExitCode {
    let settings = &config.settings;
    let http = match http_client(settings.connect_timeout()) {
        Ok(http) => http,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let api = Arc::new(HttpLogApi::new(http.clone(), &settings.server_url, settings.token.clone()));
    let watcher = LogWatcher::new(
        api,
        StreamClient::new(http, settings.token.clone()),
        WatcherOptions {
            retry_delay: settings.retry_delay(),
            resume: settings.resume,
        },
    );

    let mut renderer = TerminalRenderer::new(std::io::stdout());
    if no_color {
        renderer = renderer.without_color();
    }
    let handle = watcher.watch(instance_id, renderer);

    let disposer = handle.disposer();
    if let Err(e) = SignalHandler::new().install(move || disposer.dispose()) {
        eprintln!("Warning: failed to install interrupt handler: {}", e);
    }

    match handle.finished().await {
        Ok(summary) => {
            debug!(?summary, "watch finished");
            match summary.outcome {
                WatchOutcome::Done => ExitCode::SUCCESS,
                WatchOutcome::Disposed => ExitCode::from(EXIT_CODE_INTERRUPTED as u8),
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_urls(config: &EffectiveConfig, instance_id: &str) -> ExitCode {
    let settings = &config.settings;
    let result = match http_client(settings.connect_timeout()) {
        Ok(http) => {
            HttpLogApi::new(http, &settings.server_url, settings.token.clone())
                .headless_log_urls(instance_id)
                .await
        }
        Err(e) => Err(e),
    };

    match result.map(|urls| serde_json::to_string_pretty(&urls)) {
        Ok(Ok(json)) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
