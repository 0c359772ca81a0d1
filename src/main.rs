use std::{error::Error, io, process, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use tokio::sync::broadcast;

use remamp::{
    config::{Config, Connection, Password},
    events::Event,
    http, remote,
    store::Store,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when built in release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host running the player's httpQ plugin
    #[arg(value_hint = ValueHint::Hostname)]
    host: String,

    /// httpQ port on the remote host
    #[arg(short = 'P', long, default_value_t = 4800)]
    port: u16,

    /// Secrets file
    ///
    /// Ensure that this file is kept secure and not shared publicly, as
    /// it contains the password that grants control over your player.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("secrets.toml"))]
    secrets_file: String,

    /// httpQ password
    ///
    /// Overrides the secrets file when given.
    #[arg(long, value_name = "PASSWORD")]
    password: Option<Password>,

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
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Loads the httpQ password from the arguments or the secrets file.
fn load_password(args: &Args) -> io::Result<Password> {
    if let Some(ref password) = args.password {
        return Ok(password.clone());
    }

    let password = Password::from_file(&args.secrets_file);

    if let Err(ref e) = password {
        if e.kind() == io::ErrorKind::NotFound {
            info!(
                "create {} with a password entry, or pass --password",
                args.secrets_file
            );
        }
    }

    password
}

fn jittered_retry() -> Duration {
    // Sleep with jitter to prevent thundering herds when several monitors
    // watch the same player. Subsecond precision further spreads requests
    // when this is launched from some crontab.
    Duration::from_millis(fastrand::u64(5_000..6_000))
}

fn log_state(store: &Store) {
    let state = store.state();

    if !state.is_connected() {
        info!("disconnected");
        return;
    }

    let position = state.position().as_secs();
    match state.track() {
        Some(track) => {
            let name = match track.artist() {
                "" => track.title().to_owned(),
                artist => format!("{artist} - {}", track.title()),
            };
            info!(
                "{}: {name} at {}:{:02} (volume {}, repeat {})",
                if state.is_playing() { "playing" } else { "paused" },
                position / 60,
                position % 60,
                state.volume(),
                state.repeat(),
            );
        }
        None => info!("no track loaded"),
    }
}

/// Main application loop.
///
/// Watches the store's event stream and keeps retrying the connection
/// with a jittered timer whenever polling gets suspended.
///
/// # Errors
///
/// This function returns an error when the password cannot be loaded or
/// the HTTP client cannot be constructed.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let password = load_password(&args)?;
    let connection = Connection {
        host: args.host.clone(),
        port: args.port,
        password,
    };

    let config = Config::with_connection(connection.clone());
    let transport = http::Client::new(&config)?;
    let store = Store::new(remote::Client::new(transport, connection));
    let mut events = store.subscribe();

    store.start_polling();

    let retry_timer = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(retry_timer);
    let mut retrying = false;

    loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down gracefully");
                store.stop_polling();
                break Ok(());
            }

            event = events.recv() => match event {
                Ok(Event::Changed) => log_state(&store),
                Ok(Event::Connected) => info!("connected to {}:{}", args.host, args.port),
                Ok(Event::Disconnected) => {
                    if let Some(failure) = store.last_failure() {
                        error!("{failure}");
                    }

                    let duration = jittered_retry();
                    info!("retrying connection in {:.1}s", duration.as_secs_f32());
                    retry_timer.as_mut().reset(tokio::time::Instant::now() + duration);
                    retrying = true;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("event stream lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },

            () = &mut retry_timer, if retrying => {
                if store.reconnect().await {
                    retrying = false;
                } else {
                    let duration = jittered_retry();
                    info!("retrying connection in {:.1}s", duration.as_secs_f32());
                    retry_timer.as_mut().reset(tokio::time::Instant::now() + duration);
                }
            }
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
    debug!("Command {args:#?}");

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
