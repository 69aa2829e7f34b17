use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use plugin_host::application::messaging::MessageParser;
use plugin_host::application::scheduling::{FireOutcome, TaskKey};
use plugin_host::domain::entities::Sender;
use plugin_host::infrastructure::adapters::ConsoleAdapter;
use plugin_host::{Config, PluginManager};

#[derive(Parser)]
#[command(name = "plugin-host")]
#[command(about = "Plugin host and supervisor for an event-driven chatbot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Plugins directory (overrides config)
    #[arg(short, long)]
    plugins_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the host with the console transport
    Run,
    /// Load plugins and print what was found
    List,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = load_config(&cli.config, cli.plugins_dir);
            with_runtime(run_console(config));
        }
        Commands::List => {
            let config = load_config(&cli.config, cli.plugins_dir);
            with_runtime(list_plugins(config));
        }
        Commands::Version => {
            println!("plugin-host v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::InitConfig => {
            init_config();
        }
    }
}

fn load_config(config_path: &str, plugins_dir: Option<PathBuf>) -> Config {
    let mut config = if std::path::Path::new(config_path).exists() {
        Config::load(config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::load_env()
        })
    } else {
        Config::load_env()
    };
    if let Some(dir) = plugins_dir {
        config.plugins.directory = dir;
    }
    config
}

fn with_runtime<F: std::future::Future<Output = ()>>(fut: F) {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(fut),
        Err(e) => {
            tracing::error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_console(config: Config) {
    tracing::info!("Starting plugin host: {}", config.bot.name);
    let parser = MessageParser::new(&config.bot.prefix);
    let auto_load = config.plugins.auto_load;

    let console = Arc::new(ConsoleAdapter::new(&config.bot.name));
    let manager = match PluginManager::builder(config).transport(console.clone()).build() {
        Ok(manager) => manager,
        Err(e) => {
            tracing::error!("Failed to start plugin host: {}", e);
            return;
        }
    };

    if auto_load {
        match manager.load_all(false).await {
            Ok(summary) => tracing::info!("Plugin system initialized with {} plugins", summary.loaded.len()),
            Err(e) => tracing::warn!("Failed to load plugins: {}", e),
        }
    }
    if let Err(e) = manager.start() {
        tracing::error!("Failed to start health monitor: {}", e);
    }

    println!("Type a message, {}command, #button:<id>, or !help for operator commands.", parser.prefix());
    let sender = Sender::new("console").with_display_name("Console");

    loop {
        let input = tokio::select! {
            line = console.read_line("> ") => line,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(input) = input else { break };
        if input.is_empty() {
            continue;
        }

        if let Some(op) = input.strip_prefix('!') {
            if !op.is_empty() && !op.starts_with(char::is_whitespace) {
                println!("{}", operator_command(&manager, op).await);
                continue;
            }
        }

        let message = parser.parse("console", input, Some(sender.clone()));
        let is_command = message.content.is_command();
        let summary = manager.dispatch(message.clone().into()).await;
        tracing::debug!("Dispatched to {} plugins ({} failed)", summary.invoked.len(), summary.failed.len());

        if is_command {
            match manager.execute_command(message.into()).await {
                Ok(Some((plugin, Err(e)))) => println!("Command failed in {}: {}", plugin, e),
                Ok(_) => {}
                Err(e) => tracing::debug!("{}", e),
            }
        }
    }

    manager.shutdown().await;
}

/// Handle a `!command` typed at the console
async fn operator_command(manager: &Arc<PluginManager>, input: &str) -> String {
    let mut parts = input.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();

    match (name, arg) {
        ("plugins", _) => {
            let stats = manager.plugin_stats();
            if stats.is_empty() {
                return "No plugins loaded".to_string();
            }
            stats.iter()
                .map(|s| format!(
                    "{} [{}] {} v{}: {} runs, {} errors ({:.1}%), avg {:.0} ms",
                    if s.enabled { "+" } else { "-" },
                    s.name,
                    s.display_name,
                    s.version.as_deref().unwrap_or("0.0.0"),
                    s.metrics.executions,
                    s.metrics.errors,
                    s.error_rate * 100.0,
                    s.average_execution_ms,
                ))
                .collect::<Vec<_>>()
                .join("\n")
        }
        ("tasks", _) => {
            let tasks = manager.scheduled_task_status();
            if tasks.is_empty() {
                return "No scheduled tasks".to_string();
            }
            tasks.iter()
                .map(|t| format!(
                    "{} '{}' {:?} streak={} fires={} last-run={}",
                    t.key,
                    t.cron,
                    t.state,
                    t.error_streak,
                    t.fires,
                    t.last_run.map(|r| r.to_rfc3339()).unwrap_or_else(|| "never".to_string()),
                ))
                .collect::<Vec<_>>()
                .join("\n")
        }
        ("health", _) => {
            let report = manager.check_health();
            serde_json::to_string_pretty(&report).unwrap_or_else(|e| format!("Error: {}", e))
        }
        ("commands", _) => manager.commands()
            .iter()
            .map(|(plugin, c)| format!("{} ({}): {}", c.name, plugin, c.description.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join("\n"),
        ("reload", Some(plugin)) => match manager.reload(plugin).await {
            Ok(name) => format!("Reloaded {}", name),
            Err(e) => format!("Error: {}", e),
        },
        ("reload-all", _) => match manager.reload_all().await {
            Ok(summary) => format!(
                "Reloaded: {} loaded, {} skipped, {} failed",
                summary.loaded.len(),
                summary.skipped.len(),
                summary.failed.len()
            ),
            Err(e) => format!("Error: {}", e),
        },
        ("enable", Some(plugin)) => match manager.enable(plugin).await {
            Ok(()) => format!("Enabled {}", plugin),
            Err(e) => format!("Error: {}", e),
        },
        ("disable", Some(plugin)) => match manager.disable(plugin) {
            Ok(()) => format!("Disabled {}", plugin),
            Err(e) => format!("Error: {}", e),
        },
        ("trigger", Some(key)) => {
            let key: TaskKey = match key.parse() {
                Ok(key) => key,
                Err(e) => return format!("Error: {}", e),
            };
            match manager.trigger_scheduled_task(&key).await {
                Ok(FireOutcome::Completed) => format!("{} completed", key),
                Ok(outcome) => format!("{}: {:?}", key, outcome),
                Err(e) => format!("Error: {}", e),
            }
        }
        _ => "Operator commands:\n\
!plugins - Loaded plugins and metrics\n\
!tasks - Scheduled tasks\n\
!health - Run a health check\n\
!commands - Declared plugin commands\n\
!reload <name> - Reload one plugin\n\
!reload-all - Reload every plugin\n\
!enable <name> / !disable <name>\n\
!trigger <plugin>:<task> - Run a scheduled task now".to_string(),
    }
}

async fn list_plugins(config: Config) {
    let manager = match PluginManager::builder(config).build() {
        Ok(manager) => manager,
        Err(e) => {
            tracing::error!("Failed to start plugin host: {}", e);
            return;
        }
    };

    match manager.load_all(false).await {
        Ok(summary) => {
            for stats in manager.plugin_stats() {
                println!(
                    "{} - {} v{} [{}]",
                    stats.name,
                    stats.display_name,
                    stats.version.as_deref().unwrap_or("0.0.0"),
                    stats.category.as_deref().unwrap_or("general"),
                );
                if !stats.commands.is_empty() {
                    println!("    commands: {}", stats.commands.join(", "));
                }
            }
            for task in manager.scheduled_task_status() {
                println!("task {} '{}'", task.key, task.cron);
            }
            for issue in summary.skipped.iter().chain(summary.failed.iter()) {
                println!("not loaded: {} ({})", issue.file.display(), issue.reason);
            }
        }
        Err(e) => tracing::error!("Failed to load plugins: {}", e),
    }

    manager.shutdown().await;
}

fn init_config() {
    let config = Config::default();
    match serde_yaml::to_string(&config) {
        Ok(yaml) => {
            println!("{}", yaml);
            println!("\nSave this to config.yaml and adjust as needed.");
        }
        Err(e) => tracing::error!("Failed to render default config: {}", e),
    }
}
