//! notes-e2e-web - static file server for the notes web client

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Serve the notes web client from a local directory
#[derive(Parser)]
#[command(name = "notes-e2e-web")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Directory to serve
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if !args.root.is_dir() {
        anyhow::bail!("{} is not a directory", args.root.display());
    }

    notes_e2e_web::serve(SocketAddr::new(args.host, args.port), &args.root).await
}
