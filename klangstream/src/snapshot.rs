//! Persistance du cache d'URLs sur disque
//!
//! Le snapshot est un objet JSON `id → { direct_url, expires_at }` réécrit en
//! entier à chaque flush. L'écriture passe par un fichier temporaire renommé
//! ensuite, de sorte qu'un crash ne laisse jamais un fichier tronqué.

use crate::cache::CacheEntry;
use crate::error::{Result, StreamError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    direct_url: String,
    expires_at: DateTime<Utc>,
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "url_cache.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Charge le snapshot, en ignorant les entrées déjà expirées
///
/// Un fichier absent donne un cache vide ; un fichier illisible ou corrompu
/// aussi, avec un avertissement.
pub async fn load_snapshot(path: &Path) -> Vec<CacheEntry> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No URL cache snapshot, starting empty");
            return Vec::new();
        }
        Err(e) => {
            warn!(path = %path.display(), "Cannot read URL cache snapshot: {}", e);
            return Vec::new();
        }
    };

    let records: BTreeMap<String, SnapshotRecord> = match serde_json::from_slice(&data) {
        Ok(records) => records,
        Err(e) => {
            warn!(path = %path.display(), "Corrupt URL cache snapshot ignored: {}", e);
            return Vec::new();
        }
    };

    let now = Utc::now();
    let total = records.len();
    let entries: Vec<CacheEntry> = records
        .into_iter()
        .filter(|(_, r)| r.expires_at > now)
        .map(|(id, r)| CacheEntry {
            id,
            direct_url: r.direct_url,
            expires_at: r.expires_at,
        })
        .collect();

    debug!(
        path = %path.display(),
        "Loaded {} URL cache entries ({} expired dropped)",
        entries.len(),
        total - entries.len()
    );
    entries
}

/// Écrit le snapshot complet (fichier temporaire puis renommage)
pub async fn save_snapshot(path: &Path, entries: &[CacheEntry]) -> Result<()> {
    let records: BTreeMap<&str, SnapshotRecord> = entries
        .iter()
        .map(|e| {
            (
                e.id.as_str(),
                SnapshotRecord {
                    direct_url: e.direct_url.clone(),
                    expires_at: e.expires_at,
                },
            )
        })
        .collect();

    let json = serde_json::to_vec_pretty(&records)
        .map_err(|e| StreamError::Persistence(e.to_string()))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StreamError::Persistence(e.to_string()))?;
        }
    }

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|e| StreamError::Persistence(format!("{}: {}", tmp.display(), e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StreamError::Persistence(format!("{}: {}", path.display(), e)))?;

    debug!(path = %path.display(), "Saved {} URL cache entries", entries.len());
    Ok(())
}
