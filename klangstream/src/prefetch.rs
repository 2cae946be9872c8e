//! Résolution spéculative des pistes à venir
//!
//! Le lecteur signale les identifiants qu'il jouera probablement ensuite ;
//! le planificateur les résout en arrière-plan pour que la lecture suivante
//! passe par le cache. Il ne touche jamais au gouverneur.

use crate::resolver::Resolver;
use moka::future::Cache as MokaCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// Paramètres de limitation du préchargement
#[derive(Debug, Clone)]
pub struct PrefetchSettings {
    /// Fenêtre pendant laquelle un même identifiant n'est signalé qu'une fois
    pub debounce: Duration,
    /// Nombre maximal de résolutions spéculatives simultanées
    pub max_parallel: usize,
    /// Nombre d'identifiants retenus dans une liste de pistes à venir
    pub window: usize,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(60),
            max_parallel: 2,
            window: 2,
        }
    }
}

#[derive(Clone)]
pub struct PrefetchScheduler {
    resolver: Resolver,
    recent: MokaCache<String, ()>,
    permits: Arc<Semaphore>,
    window: usize,
}

impl PrefetchScheduler {
    pub fn new(resolver: Resolver, settings: PrefetchSettings) -> Self {
        Self {
            resolver,
            recent: MokaCache::builder()
                .max_capacity(10_000)
                .time_to_live(settings.debounce)
                .build(),
            permits: Arc::new(Semaphore::new(settings.max_parallel.max(1))),
            window: settings.window,
        }
    }

    /// Programme la résolution de `id` sans l'attendre
    ///
    /// Retourne `false` si rien n'a été lancé : URL déjà en cache ou
    /// identifiant déjà signalé dans la fenêtre de debounce.
    pub async fn schedule(&self, id: &str) -> bool {
        if self.resolver.cache().get(id).await.is_some() {
            debug!(id = %id, "Prefetch skipped, URL already cached");
            return false;
        }

        let entry = self.recent.entry(id.to_string()).or_insert(()).await;
        if !entry.is_fresh() {
            debug!(id = %id, "Prefetch debounced");
            return false;
        }

        let resolver = self.resolver.clone();
        let permits = self.permits.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            debug!(id = %id, "Prefetching direct URL");
            if let Err(e) = resolver.resolve(&id).await {
                debug!(id = %id, "Prefetch failed: {}", e);
            }
        });
        true
    }

    /// Programme les premiers identifiants d'une liste de pistes à venir
    ///
    /// Retourne le nombre de résolutions effectivement lancées.
    pub async fn schedule_window<S: AsRef<str>>(&self, ids: &[S]) -> usize {
        let mut scheduled = 0;
        for id in ids.iter().take(self.window) {
            if self.schedule(id.as_ref()).await {
                scheduled += 1;
            }
        }
        scheduled
    }
}
