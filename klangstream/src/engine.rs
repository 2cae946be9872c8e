//! Service de livraison audio
//!
//! [`StreamEngine`] possède le cache, le résolveur, le proxy, l'extraction
//! de secours et le préchargement, et décide du chemin de chaque requête :
//!
//! 1. URL valide en cache → relais depuis le CDN ;
//! 2. refus ou panne du CDN → invalidation puis extraction ;
//! 3. pas d'URL → résolution en arrière-plan et extraction immédiate.

use crate::cache::UrlCache;
use crate::error::StreamError;
use crate::fallback::FallbackStreamer;
use crate::governor::Governor;
use crate::prefetch::{PrefetchScheduler, PrefetchSettings};
use crate::proxy::{ProxySettings, UpstreamProxy};
use crate::resolver::Resolver;
use crate::tool::MediaTool;
use axum::{http::HeaderValue, response::Response};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Réglages du moteur
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Durée de validité d'une URL résolue
    pub url_ttl: Duration,
    /// Plafond de processus d'extraction simultanés
    pub max_concurrent_extractions: usize,
    /// Type de contenu des réponses issues de l'extraction
    pub content_type: String,
    /// Coupure d'une extraction muette
    pub stall_timeout: Option<Duration>,
    /// Snapshot du cache (aucun si `None`)
    pub snapshot_path: Option<PathBuf>,
    pub cache_capacity: u64,
    pub flush_interval: Duration,
    pub proxy: ProxySettings,
    pub prefetch: PrefetchSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            url_ttl: Duration::from_secs(3 * 3600),
            max_concurrent_extractions: 2,
            content_type: "audio/webm".to_string(),
            stall_timeout: Some(Duration::from_secs(30)),
            snapshot_path: None,
            cache_capacity: 10_000,
            flush_interval: Duration::from_secs(10),
            proxy: ProxySettings::default(),
            prefetch: PrefetchSettings::default(),
        }
    }
}

/// Compteurs exposés par `/api/stream/stats`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "klangserver", derive(utoipa::ToSchema))]
pub struct EngineStats {
    pub cached_urls: usize,
    pub pending_resolutions: usize,
    pub active_extractions: usize,
    pub max_extractions: usize,
}

pub struct StreamEngine {
    cache: UrlCache,
    resolver: Resolver,
    proxy: UpstreamProxy,
    fallback: FallbackStreamer,
    prefetch: PrefetchScheduler,
}

impl StreamEngine {
    /// Construit le moteur et ouvre le cache (snapshot compris)
    pub async fn open(
        tool: Arc<dyn MediaTool>,
        settings: EngineSettings,
    ) -> Result<Self, StreamError> {
        let cache = match &settings.snapshot_path {
            Some(path) => {
                UrlCache::open(path, settings.cache_capacity, settings.flush_interval).await
            }
            None => UrlCache::in_memory(settings.cache_capacity),
        };
        Self::with_cache(tool, cache, settings)
    }

    /// Construit le moteur autour d'un cache existant
    pub fn with_cache(
        tool: Arc<dyn MediaTool>,
        cache: UrlCache,
        settings: EngineSettings,
    ) -> Result<Self, StreamError> {
        let resolver = Resolver::new(tool.clone(), cache.clone(), settings.url_ttl);
        let proxy = UpstreamProxy::new(settings.proxy)?;
        let governor = Governor::new(settings.max_concurrent_extractions);
        let fallback = FallbackStreamer::new(tool.clone(), governor, settings.content_type)
            .with_stall_timeout(settings.stall_timeout);
        let prefetch = PrefetchScheduler::new(resolver.clone(), settings.prefetch);

        info!(
            tool = tool.name(),
            max_extractions = settings.max_concurrent_extractions,
            cached = cache.len(),
            "Stream engine ready"
        );

        Ok(Self {
            cache,
            resolver,
            proxy,
            fallback,
            prefetch,
        })
    }

    /// Livre le flux audio de `id`
    ///
    /// # Arguments
    ///
    /// * `id` - Identifiant opaque de la piste
    /// * `range` - En-tête `Range` du client (utilisé seulement sur le chemin du cache)
    ///
    /// # Erreurs
    ///
    /// [`StreamError::MissingId`], [`StreamError::Overload`] ou
    /// [`StreamError::ProcessSpawn`]. Les échecs du CDN ne remontent jamais :
    /// ils basculent sur l'extraction.
    pub async fn stream(
        &self,
        id: &str,
        range: Option<&HeaderValue>,
    ) -> Result<Response, StreamError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(StreamError::MissingId);
        }

        if let Some(entry) = self.cache.get(id).await {
            debug!(id = %id, "Cache hit, relaying from upstream");
            match self.proxy.relay(id, &entry.direct_url, range).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_upstream_failure() => {
                    warn!(id = %id, "Cached URL unusable ({}), falling back to extraction", e);
                    self.cache.invalidate_url(id, &entry.direct_url).await;
                }
                Err(e) => return Err(e),
            }
        }

        // La prochaine lecture passera par le cache
        self.resolver.resolve_in_background(id);

        self.fallback.stream(id).inspect_err(|e| {
            if e.is_overload() {
                warn!(id = %id, "Extraction refused: {}", e);
            } else {
                warn!(id = %id, "Extraction failed: {}", e);
            }
        })
    }

    /// Signale une piste qui sera probablement jouée bientôt
    pub async fn prefetch(&self, id: &str) -> bool {
        let id = id.trim();
        if id.is_empty() {
            return false;
        }
        self.prefetch.schedule(id).await
    }

    /// Signale une liste de pistes à venir (seules les premières sont retenues)
    pub async fn prefetch_window<S: AsRef<str>>(&self, ids: &[S]) -> usize {
        let ids: Vec<&str> = ids
            .iter()
            .map(|id| id.as_ref().trim())
            .filter(|id| !id.is_empty())
            .collect();
        self.prefetch.schedule_window(&ids).await
    }

    pub async fn stats(&self) -> EngineStats {
        let governor = self.fallback.governor();
        EngineStats {
            cached_urls: self.cache.len(),
            pending_resolutions: self.resolver.pending_count().await,
            active_extractions: governor.active(),
            max_extractions: governor.capacity(),
        }
    }

    pub fn cache(&self) -> &UrlCache {
        &self.cache
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Arrête le flush différé et écrit le snapshot
    pub async fn shutdown(&self) {
        match self.cache.shutdown().await {
            Ok(()) => info!("URL cache saved"),
            Err(e) => warn!("Cannot save URL cache on shutdown: {}", e),
        }
    }
}
