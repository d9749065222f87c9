use anyhow::Result;
use clap::Parser;
use duocall::config::{HttpConfig, DEFAULT_HTTP_PORT};
use duocall::server::StaticServer;
use log::info;
use std::path::PathBuf;

/// Serves the duocall single-page client.
#[derive(Parser, Debug)]
#[command(name = "duocall", version, about)]
struct Args {
    /// Port to listen on (falls back to $PORT, then 3000)
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Directory holding the client bundle
    #[arg(long, default_value = "public")]
    public_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let port = args
        .port
        .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
        .unwrap_or(DEFAULT_HTTP_PORT);

    let mut server = StaticServer::new(HttpConfig {
        port,
        bind_addr: args.bind,
        public_dir: args.public_dir,
    });
    let addr = server.start().await?;
    info!("Server running on http://{addr}");

    tokio::signal::ctrl_c().await?;
    server.stop();
    Ok(())
}
