use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use pageship_api_types::PushEvent;
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use super::HookState;

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PushResponse {
    Accepted {
        branch: String,
        run_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        superseded: Option<Uuid>,
    },
    Ignored {
        branch: String,
    },
}

pub async fn push(State(state): State<HookState>, Json(event): Json<PushEvent>) -> Response {
    let branch = event.branch().to_string();

    if state.branches.classify(&branch).is_none() {
        info!(
            target = "pageship::http::hooks",
            git_ref = %event.git_ref,
            "push to unmanaged branch ignored"
        );
        return (StatusCode::ACCEPTED, Json(PushResponse::Ignored { branch })).into_response();
    }

    let ticket = state.coordinator.start(&branch);
    info!(
        target = "pageship::http::hooks",
        branch = %branch,
        run_id = %ticket.run_id,
        superseded = ?ticket.superseded,
        "push accepted"
    );

    (
        StatusCode::ACCEPTED,
        Json(PushResponse::Accepted {
            branch,
            run_id: ticket.run_id,
            superseded: ticket.superseded,
        }),
    )
        .into_response()
}

/// Reject requests whose bearer token does not match the webhook secret.
pub async fn require_secret(
    State(state): State<HookState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let presented = extract_token(request.headers().get(header::AUTHORIZATION));
    let authorized = presented
        .is_some_and(|token| bool::from(token.as_bytes().ct_eq(state.secret.as_bytes())));

    if !authorized {
        warn!(
            target = "pageship::http::hooks",
            path = %request.uri().path(),
            credential_present = presented.is_some(),
            "webhook request rejected"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "unauthorized" })),
        )
            .into_response();
    }

    next.run(request).await
}

fn extract_token(value: Option<&header::HeaderValue>) -> Option<&str> {
    value?.to_str().ok()?.strip_prefix("Bearer ")
}
