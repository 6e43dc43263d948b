use clap::Parser;
use tracing::{error, info};

use tts_cache_proxy::{Args, Proxy, Request, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tts_cache_proxy=info".into()),
        )
        .init();

    let config = match args.proxy_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    let proxy = Proxy::new(config).await?;
    let server = Server::bind(args.bind_addr())
        .await?
        .with_cors(proxy.cors().clone());

    info!("TTS cache proxy listening on http://{}{}", server.local_addr(), proxy.config().route);
    info!("Cache dir: {}", proxy.store().root().display());
    info!("Upstream: {}", proxy.config().upstream_url);
    info!(
        "Fallback API key: {}",
        if proxy.config().fallback_api_key.is_some() { "set" } else { "not set" }
    );

    server
        .run_until(
            move |req: Request| {
                let proxy = proxy.clone();
                async move { proxy.handle(req).await }
            },
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            },
        )
        .await?;

    info!("stopped");
    Ok(())
}
