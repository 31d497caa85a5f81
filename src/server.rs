//! HTTP front for the [`DataStore`]: `POST /data`, `GET /data`, `GET /data/{id}`.
//!
//! The auth gateway in front of this router names the signed-in user in
//! [`USER_HEADER`]; requests without it are refused. The header is only
//! believed when the TCP peer is one of the configured trusted proxies, so a
//! client that reaches the port directly gets 403 whatever it sends.
//! Anti-forgery checks also belong to the gateway.
//!
//! Serve with `into_make_service_with_connect_info::<SocketAddr>()`; the
//! handlers need the peer address.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{error, warn};
use tokio_util::io::ReaderStream;

use crate::error::StoreError;
use crate::store::DataStore;
use crate::upload::{UploadPayload, USER_HEADER};

/// Largest accepted upload body.
pub const BODY_LIMIT: usize = 100 * 1024 * 1024;

type ApiError = (StatusCode, String);

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::UnsafePathComponent(_) => {
            warn!("{e}");
            (StatusCode::BAD_REQUEST, e.to_string())
        }
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
        StoreError::Io(_) | StoreError::Json(_) => {
            error!("{e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "storage failure".to_string())
        }
    }
}

#[derive(Debug, Clone)]
struct AppState {
    store: Arc<DataStore>,
    trusted: Arc<[IpAddr]>,
}

/// The signed-in user, if `peer` may assert one.
fn user(trusted: &[IpAddr], peer: SocketAddr, headers: &HeaderMap) -> Result<String, ApiError> {
    let ip = peer.ip().to_canonical();
    if !trusted.contains(&ip) {
        warn!("{ip}: not a trusted proxy");
        return Err((StatusCode::FORBIDDEN, "untrusted peer".to_string()));
    }
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or((StatusCode::UNAUTHORIZED, "not signed in".to_string()))
}

async fn post_data(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<UploadPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = user(&state.trusted, peer, &headers)?;
    let id = state.store.save(&user, &payload).await.map_err(store_error)?;
    Ok(Json(serde_json::json!({ "id": id })))
}

async fn list_data(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, ApiError> {
    let user = user(&state.trusted, peer, &headers)?;
    Ok(Json(state.store.list(&user).await.map_err(store_error)?))
}

async fn get_data(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let user = user(&state.trusted, peer, &headers)?;
    let path = state.store.open(&user, &id).await.map_err(store_error)?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| store_error(e.into()))?;
    let body = Body::from_stream(ReaderStream::new(file));
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Routes over `store`, believing [`USER_HEADER`] only from `trusted` peers.
pub fn router(store: Arc<DataStore>, trusted: &[IpAddr]) -> Router {
    let state = AppState {
        store,
        trusted: trusted.iter().map(|ip| ip.to_canonical()).collect(),
    };
    Router::new()
        .route("/data", get(list_data).post(post_data))
        .route("/data/{id}", get(get_data))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOOPBACK: [IpAddr; 1] = [IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)];

    fn alice() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_HEADER.parse::<header::HeaderName>().unwrap(),
            "alice".parse().unwrap(),
        );
        headers
    }

    #[test]
    fn missing_user_is_unauthorized() {
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let err = user(&LOOPBACK, peer, &HeaderMap::new()).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
        assert_eq!(user(&LOOPBACK, peer, &alice()).unwrap(), "alice");
    }

    #[test]
    fn user_header_from_untrusted_peer_is_forbidden() {
        let peer: SocketAddr = "10.0.0.7:5000".parse().unwrap();
        let err = user(&LOOPBACK, peer, &alice()).unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
        assert!(user(&[], "127.0.0.1:5000".parse().unwrap(), &alice()).is_err());
    }

    #[test]
    fn mapped_ipv4_peer_matches_its_plain_address() {
        let peer: SocketAddr = "[::ffff:127.0.0.1]:5000".parse().unwrap();
        assert_eq!(user(&LOOPBACK, peer, &alice()).unwrap(), "alice");
    }

    #[test]
    fn store_errors_map_to_status() {
        assert_eq!(
            store_error(StoreError::UnsafePathComponent("..".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(store_error(StoreError::NotFound("x".into())).0, StatusCode::NOT_FOUND);
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(store_error(io.into()).0, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
