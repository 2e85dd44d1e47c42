mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{CommandError, EXIT_FAILURE};
use foundation_core::{install_signal_handler, CoreError, CreateRequest, Engine};
use foundation_runtime::select_collaborators;
use foundation_schema::{RestartPolicy, Settings};
use foundation_store::StoreLayout;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const BACKEND_ENV: &str = "FOUNDATION_BACKEND";
const LOG_ENV: &str = "FOUNDATION_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "foundation",
    version,
    about = "Run a fleet of services behind a reverse proxy with automatic SSL"
)]
struct Cli {
    /// Directory holding the compose documents, checkouts and settings.
    #[arg(long, default_value = "~/.config/foundation", global = true)]
    home: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install prerequisites, write the configuration and start the proxy.
    Install {
        /// Email used for Let's Encrypt registration.
        #[arg(long)]
        email: Option<String>,
        /// Do not install the background update service.
        #[arg(long, default_value_t = false)]
        no_service: bool,
    },
    /// Start the reverse proxy and all registered services.
    Deploy,
    /// Show container state, public host and build strategy per service.
    Status,
    /// Fetch upstream commits, pull images and rebuild services.
    Update,
    /// Register a service from a git repository or an image.
    Create {
        /// Service name (lowercase letters, digits and dashes).
        name: String,
        /// Git repository URL or image reference.
        #[arg(long)]
        source: String,
        /// Public hostname routed to the service by the proxy.
        #[arg(long)]
        host: Option<String>,
        /// Container port the proxy forwards to.
        #[arg(long, requires = "host")]
        port: Option<u16>,
        /// Let's Encrypt contact for this host (defaults to the install email).
        #[arg(long, requires = "host")]
        letsencrypt_email: Option<String>,
        /// Environment variable, KEY=VALUE. Repeatable.
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Named volume, NAME:PATH. Repeatable.
        #[arg(long = "volume", value_name = "NAME:PATH")]
        volumes: Vec<String>,
        /// Container restart policy.
        #[arg(long, default_value = "unless-stopped")]
        restart: RestartPolicy,
        /// Reserve all NVIDIA GPUs for the service.
        #[arg(long, default_value_t = false)]
        gpu: bool,
    },
    /// Remove a service and its checkout. Named volumes are kept.
    Delete {
        /// Service name.
        name: String,
    },
    /// Run update and deploy in a loop.
    Watch {
        /// Seconds between cycles (defaults to the configured interval).
        #[arg(long)]
        interval: Option<u64>,
        /// Run a single cycle and exit.
        #[arg(long, default_value_t = false)]
        once: bool,
    },
    /// Run diagnostic checks on the system and the Foundation home.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();
    init_logging(&cli);
    install_signal_handler();

    let json_output = cli.json;
    let result = match cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
        command => {
            open_engine(&cli.home).and_then(|mut engine| dispatch(&mut engine, command, json_output))
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.code)
        }
    }
}

fn init_logging(cli: &Cli) {
    let watching = matches!(cli.command, Commands::Watch { .. });
    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if watching {
        "info"
    } else {
        "warn"
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr);
    // The watcher runs unattended; its log needs timestamps.
    if watching {
        builder.init();
    } else {
        builder.without_time().init();
    }
}

fn open_engine(home: &str) -> Result<Engine, CommandError> {
    let home = resolve_home(home)?;
    let layout = StoreLayout::new(&home);
    let settings = Settings::load(&layout.settings_file()).map_err(CoreError::from)?;
    let backend = std::env::var(BACKEND_ENV).unwrap_or_else(|_| "system".to_owned());
    let collaborators = select_collaborators(&backend, &settings).map_err(CoreError::from)?;
    Ok(Engine::with_settings(layout, settings, collaborators))
}

fn dispatch(engine: &mut Engine, command: Commands, json: bool) -> Result<u8, CommandError> {
    match command {
        Commands::Install { email, no_service } => {
            commands::install::run(engine, email, no_service, json)
        }
        Commands::Deploy => commands::deploy::run(engine, json),
        Commands::Status => commands::status::run(engine, json),
        Commands::Update => commands::update::run(engine, json),
        Commands::Create {
            name,
            source,
            host,
            port,
            letsencrypt_email,
            env,
            volumes,
            restart,
            gpu,
        } => commands::create::run(
            engine,
            CreateRequest {
                name,
                source,
                host,
                port,
                letsencrypt_email,
                env,
                volumes,
                restart,
                gpu,
            },
            json,
        ),
        Commands::Delete { name } => commands::delete::run(engine, &name, json),
        Commands::Watch { interval, once } => commands::watch::run(engine, interval, once, json),
        Commands::Doctor => commands::doctor::run(engine, json),
        Commands::Completions { .. } | Commands::ManPages { .. } => Err(CommandError {
            code: EXIT_FAILURE,
            message: "command does not use a Foundation home".to_owned(),
        }),
    }
}

/// Expand a leading `~/` and make the result absolute, so the path written
/// into the systemd unit does not depend on the working directory.
fn resolve_home(path: &str) -> Result<PathBuf, CommandError> {
    let expanded = match path.strip_prefix("~/") {
        Some(stripped) => match std::env::var("HOME") {
            Ok(home) => PathBuf::from(home).join(stripped),
            Err(_) => {
                return Err(CommandError::validation(
                    "cannot expand '~': HOME is not set (pass an absolute --home)",
                ))
            }
        },
        None => PathBuf::from(path),
    };
    if expanded.is_absolute() {
        return Ok(expanded);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("cannot read working directory: {e}"))?;
    Ok(cwd.join(expanded))
}
