//! Relais HTTP depuis une URL directe en cache
//!
//! Le proxy transmet l'en-tête `Range` du client au CDN et relaie statut,
//! en-têtes utiles et corps morceau par morceau. Il n'appelle jamais l'outil
//! externe : un refus ou une panne du CDN remonte sous forme d'erreur pour
//! que le moteur invalide l'entrée et bascule sur l'extraction.

use crate::error::StreamError;
use axum::{
    body::Body,
    http::{header, HeaderValue},
    response::Response,
};
use futures::StreamExt;
use std::io;
use std::time::Duration;
use tracing::{debug, warn};

/// Paramètres du client sortant
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Délai maximal pour les en-têtes puis entre deux morceaux du corps
    pub read_timeout: Duration,
    /// Type de contenu annoncé quand le CDN n'en fournit pas
    pub default_content_type: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".to_string(),
            connect_timeout: Duration::from_secs(4),
            read_timeout: Duration::from_secs(8),
            default_content_type: "audio/webm".to_string(),
        }
    }
}

/// Proxy vers le CDN
#[derive(Clone)]
pub struct UpstreamProxy {
    client: reqwest::Client,
    settings: ProxySettings,
}

impl UpstreamProxy {
    pub fn new(settings: ProxySettings) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| StreamError::Config(e.into()))?;
        Ok(Self { client, settings })
    }

    fn classify(e: &reqwest::Error) -> StreamError {
        if e.is_timeout() {
            StreamError::UpstreamTransient("timeout".to_string())
        } else if e.is_connect() {
            StreamError::UpstreamTransient(format!("connection failed: {}", e))
        } else {
            StreamError::UpstreamTransient(e.to_string())
        }
    }

    /// Ouvre `url` et prépare la réponse à relayer au client
    ///
    /// # Arguments
    ///
    /// * `id` - Identifiant (pour les logs)
    /// * `url` - URL directe en cache
    /// * `range` - En-tête `Range` du client, transmis tel quel
    ///
    /// # Erreurs
    ///
    /// [`StreamError::UpstreamExpired`] pour 401/403/404/410,
    /// [`StreamError::UpstreamTransient`] pour un timeout, une erreur de
    /// connexion ou un 5xx. Les autres statuts sont relayés.
    pub async fn relay(
        &self,
        id: &str,
        url: &str,
        range: Option<&HeaderValue>,
    ) -> Result<Response, StreamError> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(header::RANGE, range.clone());
        }

        let first_byte_timeout = self.settings.connect_timeout + self.settings.read_timeout;
        let upstream = tokio::time::timeout(first_byte_timeout, request.send())
            .await
            .map_err(|_| StreamError::UpstreamTransient("timeout".to_string()))?
            .map_err(|e| Self::classify(&e))?;

        let status = upstream.status();
        if let Some(err) = StreamError::from_upstream_status(status.as_u16()) {
            debug!(id = %id, status = status.as_u16(), "Upstream refused cached URL");
            return Err(err);
        }

        let mut builder = Response::builder().status(status);
        let headers = upstream.headers();
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .cloned()
            .or_else(|| HeaderValue::from_str(&self.settings.default_content_type).ok());
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        for name in [header::CONTENT_RANGE, header::CONTENT_LENGTH] {
            if let Some(value) = headers.get(&name) {
                builder = builder.header(name, value.clone());
            }
        }
        builder = builder.header(header::ACCEPT_RANGES, "bytes");

        debug!(id = %id, status = status.as_u16(), "Relaying upstream bytes");

        let read_timeout = self.settings.read_timeout;
        let id = id.to_string();
        let body = async_stream::stream! {
            let mut chunks = upstream.bytes_stream();
            loop {
                match tokio::time::timeout(read_timeout, chunks.next()).await {
                    Ok(Some(Ok(chunk))) => yield Ok(chunk),
                    Ok(Some(Err(e))) => {
                        warn!(id = %id, "Upstream body interrupted: {}", e);
                        yield Err(io::Error::other(e));
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(id = %id, "Upstream body stalled for {:?}", read_timeout);
                        yield Err(io::Error::new(io::ErrorKind::TimedOut, "upstream stalled"));
                        break;
                    }
                }
            }
        };

        builder
            .body(Body::from_stream(body))
            .map_err(|e| StreamError::UpstreamTransient(e.to_string()))
    }
}
