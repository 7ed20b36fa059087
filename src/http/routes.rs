//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    active_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.match_registry.active_matches(),
        active_players: state.match_registry.total_players(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::http::ticket::{sign_ticket, TicketClaims};
    use crate::level::InMemoryLevelStore;
    use crate::util::time::unix_millis;
    use crate::ws::protocol::Role;

    fn test_state() -> AppState {
        let config = Config::from_lookup(|key| match key {
            "TICKET_SECRET" => Some("secret".to_string()),
            "LEVEL_STORE_URL" => Some("http://levels.invalid".to_string()),
            _ => None,
        })
        .unwrap();
        AppState::with_level_store(config, Arc::new(InMemoryLevelStore::new()))
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn health_reports_registry_counts() {
        let (status, body) = get(build_router(test_state()), "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["activeMatches"], 0);
        assert_eq!(json["activePlayers"], 0);
    }

    #[tokio::test]
    async fn socket_without_ticket_is_unauthorized() {
        let (status, _) = get(build_router(test_state()), "/ws").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn socket_with_forged_ticket_is_unauthorized() {
        let claims = TicketClaims {
            sub: "p1".into(),
            role: Role::Creator,
            display_name: "Ada".to_string(),
            match_id: "m1".into(),
            game_id: "ballgame".to_string(),
            exp: unix_millis() / 1000 + 60,
        };
        let forged = sign_ticket(&claims, "not-the-secret").unwrap();

        let (status, _) = get(build_router(test_state()), &format!("/ws?ticket={forged}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_ticket_without_upgrade_is_bad_request() {
        let claims = TicketClaims {
            sub: "p1".into(),
            role: Role::Creator,
            display_name: "Ada".to_string(),
            match_id: "m1".into(),
            game_id: "ballgame".to_string(),
            exp: unix_millis() / 1000 + 60,
        };
        let ticket = sign_ticket(&claims, "secret").unwrap();

        let (status, _) = get(build_router(test_state()), &format!("/ws?ticket={ticket}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
