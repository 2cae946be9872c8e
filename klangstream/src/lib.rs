//! # klangstream - Moteur de livraison audio de Klang
//!
//! Cette crate transforme un identifiant de piste opaque en flux audio
//! servi au lecteur, en appelant le moins possible l'outil de résolution
//! externe (`yt-dlp`), lent et limité en débit.
//!
//! ## Vue d'ensemble
//!
//! - **Cache d'URLs** : URLs directes du CDN avec expiration, persistées
//!   dans un snapshot JSON écrit de façon différée
//! - **Résolveur** : une seule invocation de l'outil par identifiant, quel
//!   que soit le nombre de requêtes concurrentes
//! - **Proxy** : relais depuis l'URL en cache avec support de `Range`
//! - **Extraction de secours** : sortie standard d'un processus `yt-dlp`
//!   envoyée directement au client quand aucune URL n'est en cache
//! - **Gouverneur** : plafond de processus d'extraction simultanés (`429` au-delà)
//! - **Préchargement** : résolution spéculative des pistes à venir
//!
//! ## Structure des modules
//!
//! ```text
//! klangstream/
//! ├── src/
//! │   ├── lib.rs          # Module principal (ce fichier)
//! │   ├── engine.rs       # Service qui orchestre les composants
//! │   ├── cache.rs        # Cache d'URLs avec flush différé
//! │   ├── snapshot.rs     # Lecture/écriture du snapshot JSON
//! │   ├── resolver.rs     # Résolution dédupliquée
//! │   ├── tool.rs         # Trait MediaTool et implémentation yt-dlp
//! │   ├── proxy.rs        # Relais HTTP depuis le CDN
//! │   ├── fallback.rs     # Flux depuis un processus d'extraction
//! │   ├── process.rs      # Processus supervisé et annulable
//! │   ├── governor.rs     # Limite de concurrence
//! │   ├── prefetch.rs     # Préchargement
//! │   ├── config_ext.rs   # Lecture de la configuration
//! │   ├── api.rs          # Handlers HTTP (feature klangserver)
//! │   └── server_ext.rs   # Extension de klangserver (feature klangserver)
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use klangstream::{EngineSettings, StreamEngine, YtDlp};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = StreamEngine::open(Arc::new(YtDlp::default()), EngineSettings::default()).await?;
//!
//!     // Résolution anticipée de la piste suivante
//!     engine.prefetch("dQw4w9WgXcQ").await;
//!
//!     let response = engine.stream("dQw4w9WgXcQ", None).await?;
//!     println!("status: {}", response.status());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config_ext;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod governor;
pub mod prefetch;
pub mod process;
pub mod proxy;
pub mod resolver;
pub mod snapshot;
pub mod tool;

#[cfg(feature = "klangserver")]
pub mod api;
#[cfg(feature = "klangserver")]
pub mod server_ext;

pub use cache::{CacheEntry, UrlCache};
pub use config_ext::StreamConfigExt;
pub use engine::{EngineSettings, EngineStats, StreamEngine};
pub use error::{ResolutionError, Result, StreamError};
pub use fallback::FallbackStreamer;
pub use governor::{Governor, ProcessSlot};
pub use prefetch::{PrefetchScheduler, PrefetchSettings};
pub use process::{ExtractionProcess, ProcessExit};
pub use proxy::{ProxySettings, UpstreamProxy};
pub use resolver::Resolver;
pub use tool::{MediaTool, YtDlp};

#[cfg(feature = "klangserver")]
pub use server_ext::StreamServerExt;
