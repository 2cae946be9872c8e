//! Gestion des erreurs du moteur de streaming

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;

/// Type Result personnalisé pour klangstream
pub type Result<T> = std::result::Result<T, StreamError>;

/// Échec de l'outil externe à produire une URL directe
///
/// Clonable : le même résultat est remis à tous les appelants en attente
/// d'une résolution partagée.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// L'outil s'est terminé avec un code non nul
    #[error("{tool} exited with code {code:?}: {message}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        message: String,
    },

    /// L'outil n'a pas répondu à temps
    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),

    /// Sortie de l'outil sans URL exploitable
    #[error("no direct URL in tool output")]
    NoUrl,

    /// Impossible de lancer l'outil
    #[error("cannot spawn resolution tool: {0}")]
    Spawn(String),

    /// La tâche de résolution a été interrompue
    #[error("resolution aborted: {0}")]
    Aborted(String),
}

/// Erreurs possibles lors de la livraison d'un flux
#[derive(Error, Debug)]
pub enum StreamError {
    /// Paramètre `id` absent ou vide
    #[error("missing id")]
    MissingId,

    /// Erreur de résolution
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Le CDN refuse l'URL en cache (expirée ou révoquée)
    #[error("upstream rejected cached URL with status {0}")]
    UpstreamExpired(u16),

    /// Timeout, connexion coupée ou 5xx côté CDN
    #[error("upstream unavailable: {0}")]
    UpstreamTransient(String),

    /// Le système n'a pas pu lancer le processus d'extraction
    #[error("cannot spawn extraction process: {0}")]
    ProcessSpawn(#[source] std::io::Error),

    /// Toutes les places d'extraction sont occupées
    #[error("too many concurrent extractions (limit {limit})")]
    Overload { limit: usize },

    /// Erreur de lecture/écriture du snapshot
    #[error("cache persistence error: {0}")]
    Persistence(String),

    /// Erreur d'entrée/sortie
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Erreur de configuration (anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),
}

impl StreamError {
    /// Classe une réponse d'erreur du CDN
    ///
    /// 401/403/404/410 signifient que l'URL n'est plus valable ; les 5xx sont
    /// transitoires. Les autres statuts (416, ...) ne sont pas des échecs
    /// d'URL et sont relayés tels quels : `None`.
    pub fn from_upstream_status(code: u16) -> Option<Self> {
        match code {
            401 | 403 | 404 | 410 => Some(Self::UpstreamExpired(code)),
            500..=599 => Some(Self::UpstreamTransient(format!("status {}", code))),
            _ => None,
        }
    }

    /// Vrai si l'erreur doit invalider l'URL en cache et basculer sur l'extraction
    pub fn is_upstream_failure(&self) -> bool {
        matches!(self, Self::UpstreamExpired(_) | Self::UpstreamTransient(_))
    }

    /// Vérifie si l'erreur est un refus du gouverneur
    pub fn is_overload(&self) -> bool {
        matches!(self, Self::Overload { .. })
    }

    /// Statut HTTP présenté au client
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingId => StatusCode::BAD_REQUEST,
            Self::Overload { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamExpired(_) | Self::UpstreamTransient(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::MissingId => "Missing id".to_string(),
            Self::Overload { .. } => "Too many concurrent streams".to_string(),
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_status_classification() {
        for code in [401, 403, 404, 410] {
            assert!(matches!(
                StreamError::from_upstream_status(code),
                Some(StreamError::UpstreamExpired(c)) if c == code
            ));
        }
        assert!(matches!(
            StreamError::from_upstream_status(503),
            Some(StreamError::UpstreamTransient(_))
        ));
        assert!(StreamError::from_upstream_status(200).is_none());
        assert!(StreamError::from_upstream_status(206).is_none());
        assert!(StreamError::from_upstream_status(416).is_none());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(StreamError::MissingId.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            StreamError::Overload { limit: 2 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        let spawn = StreamError::ProcessSpawn(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "yt-dlp",
        ));
        assert_eq!(spawn.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(StreamError::UpstreamExpired(410).is_upstream_failure());
        assert!(!spawn.is_upstream_failure());
    }
}
