//! Initialisation du logging : subscriber `tracing` avec niveau réglable à chaud

use anyhow::{Context, Result};
use klangconfig::get_config;
use tracing::Level;
use tracing_subscriber::{
    Registry, filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

/// Options d'initialisation du système de logging
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Niveau minimum au démarrage
    pub min_level: Level,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            min_level: Level::INFO,
        }
    }
}

impl LoggingOptions {
    /// Lit les options depuis la section `host.logger` de la configuration
    pub fn from_config() -> Self {
        let defaults = Self::default();
        Self {
            min_level: get_config()
                .get_log_min_level()
                .ok()
                .and_then(|l| parse_level(&l))
                .unwrap_or(defaults.min_level),
        }
    }
}

/// Poignée sur le filtre de niveau du subscriber global
#[derive(Clone)]
pub struct LogControl {
    handle: reload::Handle<LevelFilter, Registry>,
}

impl LogControl {
    /// Niveau actuellement appliqué
    pub fn level(&self) -> Option<LevelFilter> {
        self.handle.clone_current()
    }

    /// Change le niveau sans redémarrer
    pub fn set_level(&self, level: Level) -> Result<()> {
        self.handle
            .reload(LevelFilter::from_level(level))
            .context("Failed to reload log level filter")?;
        tracing::info!("Log level changed to {}", level);
        Ok(())
    }
}

/// Installe le subscriber global (filtre rechargeable + sortie console)
///
/// Si un subscriber global existe déjà, un avertissement est émis et la
/// poignée retournée ne pilote que le filtre non installé.
///
/// # Exemple
/// ```rust,no_run
/// use klangserver::logs::{init_logging, LoggingOptions};
///
/// let control = init_logging(LoggingOptions::from_config());
/// ```
pub fn init_logging(options: LoggingOptions) -> LogControl {
    let (filter, handle) = reload::Layer::new(LevelFilter::from_level(options.min_level));

    // Le filtre doit précéder la couche fmt
    let result = Registry::default()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true),
        )
        .try_init();

    if let Err(e) = result {
        tracing::warn!("Logging already initialised: {}", e);
    }

    LogControl { handle }
}

/// Lit un niveau (`ERROR`..`TRACE`, casse et espaces ignorés)
pub fn parse_level(s: &str) -> Option<Level> {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}
