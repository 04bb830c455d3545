use anyhow::Context;
use clap::{Parser, Subcommand};
use kontrol::auth::{compute_digest, SharedSecret};
use kontrol::command::DispatchTable;
use kontrol::config::{self, Settings};
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kontrol")]
#[command(about = "Kontrol: allow-listed cluster commands from chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the HTTP gateway (Teams webhook, health probe and, if enabled, the raw command endpoint).
    Serve {
        /// Config file path (default: KONTROL_CONFIG_PATH or ~/.kontrol/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 9000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Validate configuration and permissions; fails if an allowed verb/resource pair has no backend operation.
    Check {
        /// Config file path (default: KONTROL_CONFIG_PATH or ~/.kontrol/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print the HMAC digest for a payload (for testing a webhook by hand). Reads stdin when no file is given.
    Sign {
        /// Config file path, used for the shared secret when --secret is not given
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Base64-encoded shared secret (default: KONTROL_SHARED_SECRET or auth.sharedSecret)
        #[arg(long, value_name = "BASE64")]
        secret: Option<String>,

        /// File whose exact bytes are signed
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("KONTROL_LOG", "info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("kontrol {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Check { config }) => match run_check(config) {
            Ok(true) => {}
            Ok(false) => std::process::exit(1),
            Err(e) => {
                log::error!("check failed: {:#}", e);
                std::process::exit(1);
            }
        },
        Some(Commands::Sign {
            config,
            secret,
            file,
        }) => {
            if let Err(e) = run_sign(config, secret, file) {
                log::error!("sign failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    log::info!("starting gateway on {}:{}", config.server.bind, config.server.port);
    kontrol::gateway::run_gateway(config, path).await
}

/// Returns false when the permissions allow commands nothing can execute.
fn run_check(config_path: Option<PathBuf>) -> anyhow::Result<bool> {
    let (config, path) = config::load_config(config_path)?;
    let settings = Settings::resolve(&config, &path).context("loading settings")?;
    let gaps = DispatchTable::new().unwired(&settings.allowlist);
    if gaps.is_empty() {
        println!("configuration ok ({})", path.display());
        return Ok(true);
    }
    for (verb, resource) in &gaps {
        println!("not wired: {} {}", verb, resource);
    }
    Ok(false)
}

fn run_sign(
    config_path: Option<PathBuf>,
    secret: Option<String>,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let secret = match secret {
        Some(s) => s,
        None => {
            let (config, _) = config::load_config(config_path)?;
            config::resolve_shared_secret(&config)
                .ok_or_else(|| anyhow::anyhow!("no shared secret (pass --secret or set KONTROL_SHARED_SECRET)"))?
        }
    };
    let payload = match file {
        Some(p) => std::fs::read(&p).with_context(|| format!("reading {}", p.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("reading payload from stdin")?;
            buf
        }
    };
    let digest = compute_digest(&payload, &SharedSecret::new(secret))?;
    println!("HMAC {}", digest);
    Ok(())
}
