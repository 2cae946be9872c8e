use klangserver::{LoggingOptions, ServerBuilder};
use klangstream::StreamServerExt;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Infrastructure ==========
    let mut server = ServerBuilder::new_configured().build();
    let _logs = server.init_logging(LoggingOptions::from_config());

    let config_dir = klangconfig::get_config().get_config_dir().to_string();
    info!("Using configuration from {}", config_dir);

    server
        .add_route("/info", || async {
            serde_json::json!({
                "name": "Klang",
                "version": env!("CARGO_PKG_VERSION"),
            })
        })
        .await;

    // ========== PHASE 2 : Moteur de streaming ==========
    info!("Initializing stream engine...");
    let engine = server.init_stream_engine().await?;
    let stats = engine.stats().await;
    info!(
        "Stream engine ready ({} cached URL(s), {} extraction slot(s))",
        stats.cached_urls, stats.max_extractions
    );

    // ========== PHASE 3 : Démarrage du serveur ==========
    info!("Starting HTTP server...");
    server.start().await?;

    info!("Klang is ready!");
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    engine.shutdown().await;
    Ok(())
}
