use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chatbridge")]
#[command(about = "Bridge chat bots to an agent dispatch endpoint", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: CHATBRIDGE_CONFIG_PATH or ~/.chatbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Connect every configured bot and route messages until Ctrl+C.
    Run {
        /// Config file path (default: CHATBRIDGE_CONFIG_PATH or ~/.chatbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Serve the status endpoint on this port (enables it)
        #[arg(long, value_name = "PORT")]
        status_port: Option<u16>,
    },

    /// Send one message as a bot, then disconnect.
    Send {
        /// Config file path (default: CHATBRIDGE_CONFIG_PATH or ~/.chatbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Bot username to send as
        #[arg(long)]
        bot: String,

        /// Target: room id, chat:group:<roomId>, or <bot>:<roomId>
        #[arg(long)]
        to: String,

        /// Message text
        text: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("chatbridge {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run {
            config,
            status_port,
        }) => {
            if let Err(e) = run_bridge(config, status_port).await {
                log::error!("bridge failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Send {
            config,
            bot,
            to,
            text,
        }) => {
            if let Err(e) = run_send(config, &bot, &to, &text).await {
                log::error!("send failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(chatbridge::config::default_config_path);
    let dir = chatbridge::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_bridge(config_path: Option<PathBuf>, status_port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = chatbridge::config::load_config(config_path)?;
    if let Some(port) = status_port {
        config.status.enabled = true;
        config.status.port = port;
    }
    log::info!(
        "starting bridge with {} bot(s) from {}",
        config.bots.len(),
        path.display()
    );
    chatbridge::service::run_bridge(config).await
}

async fn run_send(
    config_path: Option<PathBuf>,
    bot: &str,
    to: &str,
    text: &str,
) -> anyhow::Result<()> {
    let (config, _) = chatbridge::config::load_config(config_path)?;
    let sent = chatbridge::service::send_once(&config, bot, to, text).await?;
    println!("sent {} message(s)", sent);
    Ok(())
}
