//! Livraison directe depuis un processus d'extraction
//!
//! Utilisé quand aucune URL valide n'est en cache : la sortie standard du
//! processus est envoyée au client en `200` chunked. Un `Range` éventuel est
//! ignoré sur ce chemin.

use crate::error::StreamError;
use crate::governor::Governor;
use crate::process::ExtractionProcess;
use crate::tool::MediaTool;
use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct FallbackStreamer {
    tool: Arc<dyn MediaTool>,
    governor: Governor,
    content_type: String,
    stall_timeout: Option<Duration>,
}

impl FallbackStreamer {
    pub fn new(tool: Arc<dyn MediaTool>, governor: Governor, content_type: impl Into<String>) -> Self {
        Self {
            tool,
            governor,
            content_type: content_type.into(),
            stall_timeout: None,
        }
    }

    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    /// Démarre une extraction pour `id` et retourne la réponse chunked
    ///
    /// # Erreurs
    ///
    /// [`StreamError::Overload`] si le gouverneur refuse,
    /// [`StreamError::ProcessSpawn`] si le processus ne démarre pas (la place
    /// est alors rendue).
    pub fn stream(&self, id: &str) -> Result<Response, StreamError> {
        let slot = self.governor.try_acquire().ok_or(StreamError::Overload {
            limit: self.governor.capacity(),
        })?;

        let mut process = ExtractionProcess::spawn(id, self.tool.extract_command(id), slot)?;
        if let Some(timeout) = self.stall_timeout {
            process = process.with_stall_timeout(timeout);
        }

        info!(
            id = %id,
            active = self.governor.active(),
            max = self.governor.capacity(),
            "Streaming from extraction process"
        );

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, self.content_type.as_str())
            .header(header::ACCEPT_RANGES, "bytes")
            .body(Body::from_stream(process.into_stream()))
            .map_err(|e| StreamError::Io(std::io::Error::other(e)))
    }
}
