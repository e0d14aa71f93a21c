use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vodstream::cli::{Cli, Commands};
use vodstream::telemetry::{NullTelemetrySink, ReqwestTelemetrySink, TelemetrySink};
use vodstream::{config, server};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vodstream=trace,vodstream_media=trace,tower_http=debug".to_string()
        } else {
            "vodstream=debug,vodstream_media=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&env_filter)).init();

    match cli.command {
        Commands::Serve { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(host, port, cli.config.as_deref()))
        }
    }
}

async fn serve(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut app_config = config::load_config_or_default(config_path)?;

    if let Some(host) = host {
        app_config.server.host = host;
    }
    if let Some(port) = port {
        app_config.server.port = port;
    }

    let telemetry: Arc<dyn TelemetrySink> = match &app_config.hls.telemetry_host {
        Some(telemetry_host) => Arc::new(ReqwestTelemetrySink::new(telemetry_host.clone())),
        None => Arc::new(NullTelemetrySink),
    };

    let ctx = server::AppContext {
        media_dir: app_config.hls.media_dir.clone(),
        default_target_seconds: app_config.hls.target_seconds,
        telemetry,
    };

    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    tracing::info!(%addr, "starting vodstream demo host");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let router = server::create_router(ctx);
    axum::serve(listener, router).await?;

    Ok(())
}
