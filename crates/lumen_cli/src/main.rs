use clap::{Parser, Subcommand};
use lumen_core::config::LumenConfig;
use lumen_core::Query;
use lumen_gateway::GatewayServer;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod ask;
mod wiring;

#[derive(Parser, Debug)]
#[command(name = "lumen", author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "lumen.toml", env = "LUMEN_CONFIG")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Expose Prometheus metrics on this address (e.g. 0.0.0.0:9000)
    #[cfg(feature = "prometheus")]
    #[arg(long, env = "LUMEN_METRICS_ADDR")]
    metrics_addr: Option<std::net::SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer one question and exit
    Ask {
        question: String,

        /// Print progress events and tokens as they arrive
        #[arg(long)]
        stream: bool,

        #[arg(long, default_value = "cli")]
        session: String,

        #[arg(long, default_value = "anonymous")]
        user: String,
    },
    /// Run the HTTP/WebSocket gateway
    Serve {
        /// Overrides [gateway].host
        #[arg(long)]
        host: Option<String>,

        /// Overrides [gateway].port
        #[arg(long)]
        port: Option<u16>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().with_target(true).init();
    } else {
        builder.init();
    }
}

#[cfg(feature = "prometheus")]
fn install_metrics_exporter(addr: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    let Some(addr) = addr else {
        return Ok(());
    };
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start Prometheus exporter on {}: {}", addr, e))?;
    info!("Prometheus metrics on http://{}/metrics", addr);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.log_json);

    #[cfg(feature = "prometheus")]
    install_metrics_exporter(args.metrics_addr)?;

    info!("Loading config from {}", args.config);
    let config = LumenConfig::load_or_default(&args.config);
    let engine = Arc::new(wiring::build_engine(&config).await?);

    match args.command {
        Command::Ask {
            question,
            stream,
            session,
            user,
        } => {
            let query = Query::new(question, session, user);
            if stream {
                ask::run_streaming(&engine, query).await
            } else {
                ask::run_buffered(&engine, &query).await
            }
        }
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            let port = port.unwrap_or(config.gateway.port);
            GatewayServer::new(engine, &host, port).run().await
        }
    }
}
