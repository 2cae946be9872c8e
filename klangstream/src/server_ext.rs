//! Extension de klangserver::Server pour brancher le moteur de streaming
//!
//! Ce module fournit un trait d'extension permettant d'ajouter le moteur et
//! ses endpoints à un serveur klangserver sans que klangserver dépende de
//! klangstream.

use crate::api::{create_router, ApiDoc};
use crate::config_ext::StreamConfigExt;
use crate::engine::StreamEngine;
use anyhow::Result;
use klangconfig::get_config;
use klangserver::Server;
use std::sync::Arc;
use tracing::info;
use utoipa::OpenApi;

/// Trait d'extension pour ajouter le streaming audio à un serveur klangserver
///
/// # Exemple
///
/// ```rust,no_run
/// use klangstream::StreamServerExt;
/// use klangserver::ServerBuilder;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let mut server = ServerBuilder::new_configured().build();
///     let engine = server.init_stream_engine().await?;
///
///     server.start().await?;
///     server.wait().await;
///     engine.shutdown().await;
///     Ok(())
/// }
/// ```
pub trait StreamServerExt {
    /// Construit le moteur depuis la configuration et enregistre les routes
    ///
    /// # Routes enregistrées
    ///
    /// - `GET /api/stream?id=` - Flux audio
    /// - `GET /api/prefetch?id=` / `?ids=a,b` - Préchargement
    /// - `GET /api/stream/stats` - Compteurs
    /// - `GET /swagger-ui/stream` - Documentation interactive
    async fn init_stream_engine(&mut self) -> Result<Arc<StreamEngine>>;

    /// Enregistre les routes d'un moteur déjà construit
    async fn register_stream_engine(&mut self, engine: Arc<StreamEngine>);
}

impl StreamServerExt for Server {
    async fn init_stream_engine(&mut self) -> Result<Arc<StreamEngine>> {
        let config = get_config();
        let settings = config.stream_settings()?;
        let tool = Arc::new(config.ytdlp_tool());

        let engine = Arc::new(StreamEngine::open(tool, settings).await?);
        self.register_stream_engine(engine.clone()).await;
        Ok(engine)
    }

    async fn register_stream_engine(&mut self, engine: Arc<StreamEngine>) {
        self.add_router("/", create_router(engine)).await;
        self.add_api_docs(ApiDoc::openapi(), "stream").await;
        info!("Stream routes registered under /api");
    }
}
