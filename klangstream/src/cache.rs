//! Cache des URLs directes résolues
//!
//! Ce module fournit un cache en mémoire avec expiration par entrée pour
//! éviter de relancer l'outil de résolution. Chaque mutation programme une
//! écriture différée du snapshot sur disque (voir [`crate::snapshot`]).

use crate::error::Result;
use crate::snapshot::{load_snapshot, save_snapshot};
use chrono::{DateTime, Utc};
use moka::{future::Cache as MokaCache, Expiry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use moka::ops::compute::{CompResult, Op};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// URL directe résolue pour un identifiant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub direct_url: String,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(id: impl Into<String>, direct_url: impl Into<String>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            id: id.into(),
            direct_url: direct_url.into(),
            expires_at: Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Durée de vie restante (zéro si expirée)
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Expiration moka calée sur `expires_at`
struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.remaining())
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.remaining())
    }
}

/// État du flush différé
struct Persistence {
    path: PathBuf,
    interval: Duration,
    dirty: AtomicBool,
    notify: Notify,
    cancel: CancellationToken,
    /// Sérialise les écritures du snapshot
    write_lock: Mutex<()>,
    flusher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Persistence {
    fn schedule(&self) {
        // Seule la première mutation de la fenêtre arme le timer
        if !self.dirty.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }
}

/// Cache principal des URLs directes
#[derive(Clone)]
pub struct UrlCache {
    entries: MokaCache<String, CacheEntry>,
    persistence: Option<Arc<Persistence>>,
}

impl UrlCache {
    /// Crée un cache purement en mémoire (aucun snapshot)
    pub fn in_memory(capacity: u64) -> Self {
        Self {
            entries: Self::build_store(capacity),
            persistence: None,
        }
    }

    /// Ouvre le cache adossé au snapshot `path`
    ///
    /// Les entrées encore valides du snapshot sont chargées, puis une tâche
    /// de fond écrit le fichier au plus une fois par `flush_interval`.
    /// Doit être appelé depuis un runtime tokio.
    pub async fn open(path: impl AsRef<Path>, capacity: u64, flush_interval: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = Self::build_store(capacity);

        let loaded = load_snapshot(&path).await;
        let count = loaded.len();
        for entry in loaded {
            entries.insert(entry.id.clone(), entry).await;
        }
        info!(path = %path.display(), "URL cache opened with {} entries", count);

        let persistence = Arc::new(Persistence {
            path,
            interval: flush_interval,
            dirty: AtomicBool::new(false),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
            write_lock: Mutex::new(()),
            flusher: std::sync::Mutex::new(None),
        });

        let cache = Self {
            entries,
            persistence: Some(persistence.clone()),
        };
        let handle = tokio::spawn(cache.clone().run_flusher(persistence.clone()));
        *persistence
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        cache
    }

    fn build_store(capacity: u64) -> MokaCache<String, CacheEntry> {
        MokaCache::builder()
            .max_capacity(capacity)
            .expire_after(EntryExpiry)
            .build()
    }

    async fn run_flusher(self, persistence: Arc<Persistence>) {
        loop {
            tokio::select! {
                _ = persistence.notify.notified() => {}
                _ = persistence.cancel.cancelled() => break,
            }
            tokio::select! {
                _ = tokio::time::sleep(persistence.interval) => {}
                _ = persistence.cancel.cancelled() => break,
            }
            if let Err(e) = self.flush_now().await {
                warn!("URL cache flush failed: {}", e);
            }
        }
        debug!("URL cache flusher stopped");
    }

    /// Récupère une entrée encore valide
    ///
    /// Une entrée expirée est retirée au passage.
    pub async fn get(&self, id: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(id).await?;
        if entry.is_expired() {
            debug!(id = %id, "Cached URL expired");
            self.entries.invalidate(id).await;
            return None;
        }
        Some(entry)
    }

    /// Ajoute ou remplace l'URL directe de `id`
    pub async fn put(&self, id: &str, direct_url: impl Into<String>, ttl: Duration) -> CacheEntry {
        let entry = CacheEntry::new(id, direct_url, ttl);
        self.entries.insert(id.to_string(), entry.clone()).await;
        debug!(id = %id, expires_at = %entry.expires_at, "Cached direct URL");
        self.schedule_flush();
        entry
    }

    /// Retire `id` du cache
    pub async fn invalidate(&self, id: &str) {
        if self.entries.remove(id).await.is_some() {
            debug!(id = %id, "Invalidated cached URL");
            self.schedule_flush();
        }
    }

    /// Retire `id` seulement s'il pointe encore vers `direct_url`
    ///
    /// Évite d'effacer une URL fraîchement résolue entre-temps.
    /// La comparaison et le retrait se font sous le verrou de la clé.
    pub async fn invalidate_url(&self, id: &str, direct_url: &str) {
        let result = self
            .entries
            .entry_by_ref(id)
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) if entry.value().direct_url == direct_url => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;

        if let CompResult::Removed(_) = result {
            debug!(id = %id, "Invalidated cached URL");
            self.schedule_flush();
        }
    }

    /// Entrées encore valides
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.entries
            .iter()
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.is_expired())
            .collect()
    }

    /// Nombre d'entrées encore valides
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Planifie (sans forcer) l'écriture du snapshot
    fn schedule_flush(&self) {
        if let Some(p) = &self.persistence {
            p.schedule();
        }
    }

    /// Écrit immédiatement le snapshot
    ///
    /// Sans effet pour un cache en mémoire. Deux flush simultanés s'exécutent
    /// l'un après l'autre ; le second écrit l'état le plus récent.
    pub async fn flush_now(&self) -> Result<()> {
        let Some(p) = &self.persistence else {
            return Ok(());
        };
        let _write = p.write_lock.lock().await;
        p.dirty.store(false, Ordering::Release);
        save_snapshot(&p.path, &self.entries()).await
    }

    /// Arrête le flush différé et écrit une dernière fois
    ///
    /// Attend la fin d'un flush de fond déjà commencé.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(p) = &self.persistence {
            p.cancel.cancel();
            let handle = p
                .flusher
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    warn!("URL cache flusher ended abnormally: {}", e);
                }
            }
        }
        self.flush_now().await
    }

    /// Chemin du snapshot, s'il y en a un
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.persistence.as_ref().map(|p| p.path.as_path())
    }
}
