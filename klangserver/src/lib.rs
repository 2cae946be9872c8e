//! # klangserver - Serveur web haut niveau basé sur Axum
//!
//! Cette crate fournit le serveur HTTP de Klang : un wrapper autour d'Axum
//! avec routes JSON, sous-routers, documentation OpenAPI et initialisation
//! du logging.
//!
//! ## Architecture
//!
//! - [`server`] : implémentation du serveur principal et du builder
//! - [`logs`] : subscriber `tracing` avec niveau réglable à chaud
//!
//! Les crates métier s'y branchent par des traits d'extension implémentés
//! sur [`Server`] (voir `klangstream::StreamServerExt`).
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use klangserver::{ServerBuilder, logs::LoggingOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = ServerBuilder::new("MyServer", "localhost", 8080).build();
//!     server.init_logging(LoggingOptions::default());
//!
//!     server.add_route("/info", || async {
//!         serde_json::json!({"status": "ok"})
//!     }).await;
//!
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{LogControl, LoggingOptions};
pub use server::{Server, ServerBuilder, ServerInfo};
