//! Résolution dédupliquée des URLs directes
//!
//! Pour un identifiant donné, au plus une invocation de l'outil est en vol :
//! les appels concurrents rejoignent la résolution existante et reçoivent
//! tous le même résultat. La résolution tourne dans sa propre tâche et va à
//! son terme même si tous les appelants abandonnent.

use crate::cache::UrlCache;
use crate::error::ResolutionError;
use crate::tool::MediaTool;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type PendingResolution = Shared<BoxFuture<'static, Result<String, ResolutionError>>>;

/// Résolveur partagé (clonable à faible coût)
#[derive(Clone)]
pub struct Resolver {
    tool: Arc<dyn MediaTool>,
    cache: UrlCache,
    ttl: Duration,
    pending: Arc<Mutex<HashMap<String, PendingResolution>>>,
}

impl Resolver {
    /// # Arguments
    ///
    /// * `tool` - Outil externe utilisé pour résoudre
    /// * `cache` - Cache alimenté par les résolutions réussies
    /// * `ttl` - Durée de validité d'une URL résolue
    pub fn new(tool: Arc<dyn MediaTool>, cache: UrlCache, ttl: Duration) -> Self {
        Self {
            tool,
            cache,
            ttl,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Résout `id` en URL directe
    ///
    /// Retourne immédiatement une URL encore valide du cache ; sinon rejoint
    /// ou démarre la résolution de `id`. Les échecs ne sont jamais mis en cache.
    pub async fn resolve(&self, id: &str) -> Result<String, ResolutionError> {
        if let Some(entry) = self.cache.get(id).await {
            return Ok(entry.direct_url);
        }

        let resolution = {
            let mut pending = self.pending.lock().await;
            match pending.get(id) {
                Some(existing) => {
                    debug!(id = %id, "Joining in-flight resolution");
                    existing.clone()
                }
                None => {
                    // Une résolution a pu se terminer entre le cache et le verrou
                    if let Some(entry) = self.cache.get(id).await {
                        return Ok(entry.direct_url);
                    }
                    let resolution = self.start(id);
                    pending.insert(id.to_string(), resolution.clone());
                    resolution
                }
            }
        };

        resolution.await
    }

    /// Lance la résolution sans attendre le résultat
    ///
    /// Les erreurs sont journalisées puis ignorées.
    pub fn resolve_in_background(&self, id: &str) {
        let this = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.resolve(&id).await {
                debug!(id = %id, "Background resolution failed: {}", e);
            }
        });
    }

    /// Nombre de résolutions en vol
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_pending(&self, id: &str) -> bool {
        self.pending.lock().await.contains_key(id)
    }

    pub fn cache(&self) -> &UrlCache {
        &self.cache
    }

    /// Démarre la tâche de résolution ; appelé sous le verrou de `pending`
    fn start(&self, id: &str) -> PendingResolution {
        let this = self.clone();
        let id = id.to_string();

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let tool = this.tool.clone();
            let tool_id = id.clone();

            // Tâche séparée : une panique de l'outil ne bloque pas `pending`
            let result = match tokio::spawn(async move { tool.resolve(&tool_id).await }).await {
                Ok(result) => result,
                Err(e) => Err(ResolutionError::Aborted(e.to_string())),
            };

            match &result {
                Ok(url) => {
                    this.cache.put(&id, url.clone(), this.ttl).await;
                    info!(
                        id = %id,
                        tool = this.tool.name(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Resolved direct URL"
                    );
                }
                Err(e) => {
                    warn!(id = %id, tool = this.tool.name(), "Resolution failed: {}", e);
                }
            }

            this.pending.lock().await.remove(&id);
            result
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(ResolutionError::Aborted(e.to_string())))
        }
        .boxed()
        .shared()
    }
}
