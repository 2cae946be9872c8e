//! Routes HTTP du moteur de streaming
//!
//! - `GET /api/stream?id=` : flux audio (Range accepté sur le chemin du cache)
//! - `GET /api/prefetch?id=` ou `?ids=a,b` : préchargement, répond `202`
//! - `GET /api/stream/stats` : compteurs du moteur

use crate::engine::{EngineStats, StreamEngine};
use crate::error::StreamError;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, OpenApi, ToSchema};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StreamQuery {
    /// Identifiant opaque de la piste
    pub id: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PrefetchQuery {
    /// Identifiant d'une piste à précharger
    pub id: Option<String>,
    /// Liste de pistes à venir, séparées par des virgules
    pub ids: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PrefetchResponse {
    /// Nombre de résolutions effectivement lancées
    pub scheduled: usize,
}

/// Flux audio d'une piste
#[utoipa::path(
    get,
    path = "/api/stream",
    params(StreamQuery),
    responses(
        (status = 200, description = "Audio stream (audio/webm)"),
        (status = 206, description = "Partial audio stream (cached URL, Range request)"),
        (status = 400, description = "Missing id"),
        (status = 429, description = "Too many concurrent extractions"),
        (status = 500, description = "Extraction could not start")
    ),
    tag = "stream"
)]
pub async fn stream_audio(
    State(engine): State<Arc<StreamEngine>>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let id = query.id.unwrap_or_default();
    match engine.stream(&id, headers.get(header::RANGE)).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Signale des pistes à résoudre à l'avance
#[utoipa::path(
    get,
    path = "/api/prefetch",
    params(PrefetchQuery),
    responses(
        (status = 202, description = "Prefetch accepted", body = PrefetchResponse),
        (status = 400, description = "Missing id")
    ),
    tag = "stream"
)]
pub async fn prefetch(
    State(engine): State<Arc<StreamEngine>>,
    Query(query): Query<PrefetchQuery>,
) -> Response {
    let mut scheduled = 0;
    let mut given = false;

    if let Some(id) = query.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        given = true;
        if engine.prefetch(id).await {
            scheduled += 1;
        }
    }
    if let Some(ids) = query.ids.as_deref() {
        let ids: Vec<&str> = ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .collect();
        given |= !ids.is_empty();
        scheduled += engine.prefetch_window(&ids).await;
    }

    if !given {
        return StreamError::MissingId.into_response();
    }
    (StatusCode::ACCEPTED, Json(PrefetchResponse { scheduled })).into_response()
}

/// Compteurs du moteur
#[utoipa::path(
    get,
    path = "/api/stream/stats",
    responses(
        (status = 200, description = "Engine counters", body = EngineStats)
    ),
    tag = "stream"
)]
pub async fn stream_stats(State(engine): State<Arc<StreamEngine>>) -> Json<EngineStats> {
    Json(engine.stats().await)
}

/// Crée le router des routes de streaming (chemins complets sous `/api`)
pub fn create_router(engine: Arc<StreamEngine>) -> Router {
    Router::new()
        .route("/api/stream", get(stream_audio))
        .route("/api/stream/stats", get(stream_stats))
        .route("/api/prefetch", get(prefetch))
        .with_state(engine)
}

#[derive(OpenApi)]
#[openapi(
    paths(stream_audio, prefetch, stream_stats),
    components(schemas(EngineStats, PrefetchResponse)),
    tags(
        (name = "stream", description = "Audio delivery and prefetch endpoints")
    )
)]
pub struct ApiDoc;
