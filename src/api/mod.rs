// HTTP endpoints in front of the authentication core

use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRequest, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Json, Response},
    routing::{any, get, post},
};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::AuthGate;
use crate::auth::{Credentials, LoginFlow, RequestContext, UserData, perform_logout};

pub type AppState = Arc<AuthGate>;

/// Largest login body accepted (1 MiB).
pub const LOGIN_BODY_LIMIT: usize = 1024 * 1024;

const REQUEST_COUNTER_KEY: &str = "whoami.requests";

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/login", any(login))
        .route("/logout", post(logout))
        .route("/whoami", get(whoami))
        .fallback(unmatched)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(LOGIN_BODY_LIMIT)),
        )
        .with_state(state)
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn unmatched() -> StatusCode {
    StatusCode::BAD_REQUEST
}

/// Pull the configured credential fields out of a form or JSON body.
async fn read_credentials(flow: &LoginFlow, request: Request) -> Option<Credentials> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)?
        .to_str()
        .ok()?
        .to_ascii_lowercase();

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let axum::Form(pairs) = axum::Form::<Vec<(String, String)>>::from_request(request, &())
            .await
            .ok()?;
        Credentials::from_form(&pairs, flow.username_field(), flow.password_field())
    } else if content_type.starts_with("application/json") {
        let Json(body) = Json::<Value>::from_request(request, &()).await.ok()?;
        Credentials::from_json(&body, flow.username_field(), flow.password_field())
    } else {
        None
    }
}

async fn login(State(gate): State<AppState>, request: Request) -> Response {
    let Some(flow) = gate.login() else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let mut ctx = RequestContext::from_request(&request);
    let credentials = read_credentials(flow, request).await;

    match flow.perform_login(&mut ctx, credentials).await {
        Ok(()) => ctx.into_response(),
        Err(e) => {
            error!("Login failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn logout(State(gate): State<AppState>, request: Request) -> Response {
    let mut ctx = RequestContext::from_request(&request);
    perform_logout(gate.aggregator(), &mut ctx);
    ctx.into_response()
}

#[derive(Default)]
struct RequestCounter(AtomicU64);

impl UserData for RequestCounter {}

/// Report the caller's identity and how many times this session asked.
async fn whoami(State(gate): State<AppState>, request: Request) -> Response {
    let schema = gate.login().map(|flow| flow.schema()).unwrap_or_default();
    let mut ctx = RequestContext::from_request(&request);

    let Some(session) = gate.aggregator().authenticate(&mut ctx, schema).await else {
        return ctx.into_response();
    };

    // A concurrent logout may have ended the session already.
    let requests = session
        .get_or_add_user_data(REQUEST_COUNTER_KEY, |_| RequestCounter::default())
        .map(|counter| counter.0.fetch_add(1, Ordering::SeqCst) + 1)
        .unwrap_or(0);

    ctx.response_mut().finish_json(&serde_json::json!({
        "user_id": session.id(),
        "requests": requests,
    }));
    ctx.into_response()
}
