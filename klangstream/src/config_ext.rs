//! Extension pour lire les réglages de streaming depuis klangconfig
//!
//! Ce module fournit le trait `StreamConfigExt` qui ajoute à
//! `klangconfig::Config` les accès à la section `stream` du fichier de
//! configuration.

use crate::engine::EngineSettings;
use crate::prefetch::PrefetchSettings;
use crate::proxy::ProxySettings;
use crate::tool::YtDlp;
use anyhow::Result;
use klangconfig::Config;
use serde_yaml::{Number, Value};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SNAPSHOT_FILE: &str = "url_cache.json";

/// Trait d'extension pour la configuration du moteur de streaming
///
/// # Exemple
///
/// ```rust,ignore
/// use klangconfig::get_config;
/// use klangstream::StreamConfigExt;
///
/// let config = get_config();
/// let settings = config.stream_settings()?;
/// println!("URL TTL: {:?}", settings.url_ttl);
/// ```
pub trait StreamConfigExt {
    /// Réglages complets du moteur (`stream.*`)
    ///
    /// # Errors
    ///
    /// Retourne une erreur si le répertoire du snapshot ne peut pas être créé
    fn stream_settings(&self) -> Result<EngineSettings>;

    /// Outil `yt-dlp` configuré (`stream.tool.*`)
    fn ytdlp_tool(&self) -> YtDlp;

    /// Chemin absolu du snapshot (`stream.cache.file`, relatif au répertoire de config)
    fn snapshot_path(&self) -> Result<PathBuf>;

    /// Définit le chemin de l'exécutable `yt-dlp`
    fn set_stream_tool_path(&self, path: &str) -> Result<()>;

    /// Définit le plafond de processus d'extraction simultanés
    fn set_max_concurrent_extractions(&self, max: usize) -> Result<()>;
}

fn secs(config: &Config, path: &[&str], default: u64) -> Duration {
    Duration::from_secs(config.get_u64_or(path, default))
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

impl StreamConfigExt for Config {
    fn stream_settings(&self) -> Result<EngineSettings> {
        let defaults = EngineSettings::default();
        let proxy_defaults = ProxySettings::default();
        let prefetch_defaults = PrefetchSettings::default();

        // 0 désactive la coupure des extractions muettes
        let stall = self.get_u64_or(&["stream", "tool", "stall_timeout_secs"], 30);

        Ok(EngineSettings {
            url_ttl: secs(self, &["stream", "url_ttl_secs"], defaults.url_ttl.as_secs()),
            max_concurrent_extractions: self.get_u64_or(
                &["stream", "max_concurrent_extractions"],
                defaults.max_concurrent_extractions as u64,
            ) as usize,
            content_type: self.get_string_or(&["stream", "content_type"], &defaults.content_type),
            stall_timeout: (stall > 0).then(|| Duration::from_secs(stall)),
            snapshot_path: Some(self.snapshot_path()?),
            cache_capacity: self.get_u64_or(&["stream", "cache", "capacity"], defaults.cache_capacity),
            flush_interval: secs(
                self,
                &["stream", "cache", "flush_interval_secs"],
                defaults.flush_interval.as_secs(),
            ),
            proxy: ProxySettings {
                user_agent: self.get_string_or(
                    &["stream", "upstream", "user_agent"],
                    &proxy_defaults.user_agent,
                ),
                connect_timeout: secs(
                    self,
                    &["stream", "upstream", "connect_timeout_secs"],
                    proxy_defaults.connect_timeout.as_secs(),
                ),
                read_timeout: secs(
                    self,
                    &["stream", "upstream", "read_timeout_secs"],
                    proxy_defaults.read_timeout.as_secs(),
                ),
                default_content_type: self
                    .get_string_or(&["stream", "content_type"], &proxy_defaults.default_content_type),
            },
            prefetch: PrefetchSettings {
                debounce: secs(
                    self,
                    &["stream", "prefetch", "debounce_secs"],
                    prefetch_defaults.debounce.as_secs(),
                ),
                max_parallel: self.get_u64_or(
                    &["stream", "prefetch", "max_parallel"],
                    prefetch_defaults.max_parallel as u64,
                ) as usize,
                window: self.get_u64_or(
                    &["stream", "prefetch", "window"],
                    prefetch_defaults.window as u64,
                ) as usize,
            },
        })
    }

    fn ytdlp_tool(&self) -> YtDlp {
        let mut tool = YtDlp::new(self.get_string_or(&["stream", "tool", "path"], "yt-dlp"))
            .with_format(self.get_string_or(&["stream", "tool", "format"], "251"))
            .with_timeout(secs(self, &["stream", "tool", "resolve_timeout_secs"], 20))
            .with_extra_args(self.get_string_list(&["stream", "tool", "extra_args"]));

        if let Some(cookies) = non_empty(self.get_string_or(&["stream", "tool", "cookies"], "")) {
            tool = tool.with_cookies(self.resolve_path(&cookies));
        }
        if let Some(runtime) = non_empty(self.get_string_or(&["stream", "tool", "js_runtime"], "")) {
            tool = tool.with_js_runtime(runtime);
        }
        tool
    }

    fn snapshot_path(&self) -> Result<PathBuf> {
        self.get_managed_file(&["stream", "cache", "file"], DEFAULT_SNAPSHOT_FILE)
    }

    fn set_stream_tool_path(&self, path: &str) -> Result<()> {
        self.set_value(&["stream", "tool", "path"], Value::String(path.to_string()))
    }

    fn set_max_concurrent_extractions(&self, max: usize) -> Result<()> {
        self.set_value(
            &["stream", "max_concurrent_extractions"],
            Value::Number(Number::from(max)),
        )
    }
}
