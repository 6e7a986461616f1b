use std::{error::Error, fs, process};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};

use lavanode::{config::Config, events::Event, manager::NodeManager};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Contains the node passwords; keep it private.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("lavanode.toml"))]
    config_file: String,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            // Quiet and verbose are mutually exclusive.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Logs a notification at the level matching its severity.
fn log_event(event: &Event) {
    match event {
        Event::NodeError { node, error } => error!("{node}: {error}"),
        Event::NodeDisconnect { node, code, reason } => {
            warn!("{node} disconnected with code {code}: {reason}");
        }
        Event::NodeRaw { node, payload } => debug!("{node}: {payload}"),
        Event::TrackStart {
            guild_id,
            track: Some(track),
            ..
        } => info!("{guild_id} playing {track}"),
        Event::QueueEnd { guild_id, .. } => info!("{guild_id} queue ended"),
        event => info!("{event:?}"),
    }
}

/// Main application loop.
///
/// Connects every configured node and logs their notifications until
/// interrupted, then destroys the nodes.
///
/// # Errors
///
/// Returns an error when the configuration cannot be read or is invalid.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let contents = fs::read_to_string(&args.config_file).inspect_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            info!("see lavanode.toml.example for how to configure nodes");
        }
    })?;
    let config = Config::from_toml(&contents)?;
    if config.nodes.is_empty() {
        warn!("no nodes configured in {}", args.config_file);
    }

    let (manager, mut events) = NodeManager::new(config.manager)?;
    for options in config.nodes {
        let node = manager.create_node(options)?;
        node.connect();
    }

    loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down gracefully");
                for node in manager.nodes() {
                    manager.destroy_node(node.identifier());
                }
                break Ok(());
            }

            Some(event) = events.recv() => log_event(&event),
        }
    }
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
