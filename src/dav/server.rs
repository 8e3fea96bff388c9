//! HTTP wiring: Basic auth, session acquisition, and the per-user
//! `DavHandler` every WebDAV verb flows through.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use dav_server::{fakels::FakeLs, DavHandler};
use tracing::{error, warn};

use crate::auth::authenticate;
use crate::dav::fs::DavFs;
use crate::errors::GatewayError;
use crate::{health_check, AppState};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .fallback(handle_dav)
        .with_state(state)
}

async fn handle_dav(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    // Authenticate before anything else touches the request.
    let user = match authenticate(&state.engines.db, req.headers()).await {
        Ok(Some(user)) => user,
        Ok(None) => return unauthorized(&state.config.webdav_realm),
        Err(e) => {
            error!("Authentication backend failure: {:#}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    // Enforce the concurrent-session cap at connection establishment.
    match state
        .engines
        .sessions
        .acquire(user.id, &addr.ip().to_string(), &user_agent)
        .await
    {
        Ok(_) => {}
        Err(GatewayError::SessionLimitExceeded { limit }) => {
            warn!(
                "Session limit reached for user {} ({} allowed)",
                user.username, limit
            );
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
        Err(e) => {
            error!("Session acquisition failure: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let handler = DavHandler::builder()
        .filesystem(Box::new(DavFs::new(state.engines.clone(), user.id)))
        .locksystem(FakeLs::new())
        .build_handler();

    let response = handler.handle(req).await;
    response.map(Body::new)
}

fn unauthorized(realm: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            format!("Basic realm=\"{}\"", realm),
        )],
        "Authentication required",
    )
        .into_response()
}
