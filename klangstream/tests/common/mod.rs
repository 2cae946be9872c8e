#![allow(dead_code)]

use async_trait::async_trait;
use klangstream::{EngineSettings, MediaTool, ResolutionError, StreamEngine, UrlCache};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;

/// Outil factice : résolution comptée, extraction par un script `sh`
pub struct FakeTool {
    calls: AtomicUsize,
    url: Mutex<Option<String>>,
    delay: Duration,
    script: String,
}

impl FakeTool {
    pub fn new(url: Option<&str>, script: &str) -> Arc<Self> {
        Self::with_delay(url, script, Duration::from_millis(20))
    }

    /// Outil dont chaque résolution dure `delay`
    pub fn with_delay(url: Option<&str>, script: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            url: Mutex::new(url.map(str::to_string)),
            delay,
            script: script.to_string(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_url(&self, url: Option<&str>) {
        *self.url.lock().unwrap() = url.map(str::to_string);
    }
}

#[async_trait]
impl MediaTool for FakeTool {
    fn name(&self) -> &str {
        "fake"
    }

    async fn resolve(&self, _id: &str) -> Result<String, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.url.lock().unwrap().clone().ok_or(ResolutionError::NoUrl)
    }

    fn extract_command(&self, _id: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.script);
        cmd
    }
}

/// Script qui produit de l'audio factice sans fin
pub const ENDLESS: &str = "while :; do printf xxxxxxxx; sleep 0.05; done";

pub fn settings() -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.proxy.user_agent = "KlangTest/1.0".to_string();
    settings.proxy.connect_timeout = Duration::from_secs(1);
    settings.proxy.read_timeout = Duration::from_secs(2);
    settings.prefetch.debounce = Duration::from_secs(60);
    settings
}

pub fn engine(tool: Arc<FakeTool>) -> Arc<StreamEngine> {
    engine_with(tool, settings())
}

pub fn engine_with(tool: Arc<FakeTool>, settings: EngineSettings) -> Arc<StreamEngine> {
    let cache = UrlCache::in_memory(settings.cache_capacity);
    Arc::new(StreamEngine::with_cache(tool, cache, settings).unwrap())
}

/// Attend qu'une condition devienne vraie (au plus `limit`)
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
