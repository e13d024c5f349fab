//! HTTP surface of the authentication core.
//!
//! Handlers stay thin: rebuild the absolute request URL, pick the registry,
//! delegate to the strategy, translate the outcome into status codes and
//! cookies. Authorization failures never leak upstream detail to the
//! redirect target.

use std::collections::HashMap;

use axum::{
    extract::{Extension, Path},
    http::{
        HeaderMap, HeaderValue, StatusCode, Uri,
        header::{LOCATION, SET_COOKIE},
    },
    response::{IntoResponse, Json, Response},
    Form,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{error::Error, origins, AuthKit, AuthRequest};

const LOGIN_ERROR_LOCATION: &str = "/login?error=auth";

/// The authenticated user behind the current session.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub user_id: Uuid,
    pub email: String,
    pub provider: String,
}

#[utoipa::path(
    get,
    path = "/auth/{strategy}",
    params(
        ("strategy" = String, Path, description = "Registered strategy name")
    ),
    responses (
        (status = 302, description = "Redirect to the authorization server"),
        (status = 500, description = "Strategy is unknown or misconfigured")
    ),
    tag = "auth",
)]
/// Start a redirect-based login with the named strategy.
pub async fn initiate(
    Path(strategy): Path<String>,
    Extension(kit): Extension<AuthKit>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let url = match origins::absolute_request_url(&headers, &uri, kit.secure_cookies()) {
        Ok(url) => url,
        Err(err) => return error_response(&err, ErrorStyle::Json),
    };

    let request = AuthRequest::new(url.clone(), headers, HashMap::new());
    match kit.registry_for(&url).initiate(&strategy, &request) {
        Ok(redirect) => {
            let mut headers = HeaderMap::new();
            match HeaderValue::from_str(&redirect.location) {
                Ok(location) => headers.insert(LOCATION, location),
                Err(err) => {
                    return error_response(
                        &Error::Configuration(format!("invalid redirect location: {err}")),
                        ErrorStyle::Json,
                    );
                }
            };
            headers.append(SET_COOKIE, redirect.state_cookie);
            (StatusCode::FOUND, headers).into_response()
        }
        Err(err) => error_response(&err, ErrorStyle::Json),
    }
}

#[utoipa::path(
    get,
    path = "/auth/{strategy}/callback",
    params(
        ("strategy" = String, Path, description = "Registered strategy name")
    ),
    responses (
        (status = 302, description = "Login completed, session cookies set"),
        (status = 500, description = "Strategy is unknown or misconfigured")
    ),
    tag = "auth",
)]
/// Complete a redirect-based login from the authorization server callback.
pub async fn callback(
    Path(strategy): Path<String>,
    Extension(kit): Extension<AuthKit>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let url = match origins::absolute_request_url(&headers, &uri, kit.secure_cookies()) {
        Ok(url) => url,
        Err(err) => return error_response(&err, ErrorStyle::Redirect),
    };

    let request = AuthRequest::new(url.clone(), headers, HashMap::new());
    let registry = kit.registry_for(&url);
    match registry
        .verify(&strategy, &request, kit.http(), kit.users())
        .await
    {
        Ok(login) => {
            let mut headers = HeaderMap::new();
            headers.insert(LOCATION, HeaderValue::from_static("/"));
            for cookie in login.cookies {
                headers.append(SET_COOKIE, cookie);
            }
            (StatusCode::FOUND, headers).into_response()
        }
        Err(err) => error_response(&err, ErrorStyle::Redirect),
    }
}

#[utoipa::path(
    post,
    path = "/auth/{strategy}",
    params(
        ("strategy" = String, Path, description = "Registered strategy name")
    ),
    responses (
        (status = 200, description = "Login completed, session cookies set", body = SessionResponse),
        (status = 401, description = "Credentials rejected"),
        (status = 500, description = "Strategy is unknown or misconfigured"),
        (status = 502, description = "Upstream identity service unreachable")
    ),
    tag = "auth",
)]
/// Log in with a credential form (password grant, dev bypass).
pub async fn login(
    Path(strategy): Path<String>,
    Extension(kit): Extension<AuthKit>,
    headers: HeaderMap,
    uri: Uri,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let url = match origins::absolute_request_url(&headers, &uri, kit.secure_cookies()) {
        Ok(url) => url,
        Err(err) => return error_response(&err, ErrorStyle::Json),
    };

    let request = AuthRequest::new(url.clone(), headers, form);
    match kit
        .registry_for(&url)
        .verify(&strategy, &request, kit.http(), kit.users())
        .await
    {
        Ok(login) => {
            let body = match kit.users().get_user_by_id(login.session.user_id) {
                Ok(Some(user)) => Json(SessionResponse {
                    user_id: user.id,
                    email: user.email,
                    provider: user.provider,
                }),
                Ok(None) | Err(_) => Json(SessionResponse {
                    user_id: login.session.user_id,
                    email: String::new(),
                    provider: strategy,
                }),
            };
            let mut headers = HeaderMap::new();
            for cookie in login.cookies {
                headers.append(SET_COOKIE, cookie);
            }
            (StatusCode::OK, headers, body).into_response()
        }
        Err(err) => error_response(&err, ErrorStyle::Json),
    }
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses (
        (status = 204, description = "Session cookies expired")
    ),
    tag = "auth",
)]
/// Expire every cookie of the registry serving this origin.
pub async fn logout(
    Extension(kit): Extension<AuthKit>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let url = match origins::absolute_request_url(&headers, &uri, kit.secure_cookies()) {
        Ok(url) => url,
        Err(err) => return error_response(&err, ErrorStyle::Json),
    };

    match kit.registry_for(&url).logout_cookies() {
        Ok(cookies) => {
            let mut headers = HeaderMap::new();
            for cookie in cookies {
                headers.append(SET_COOKIE, cookie);
            }
            (StatusCode::NO_CONTENT, headers).into_response()
        }
        Err(err) => error_response(&err, ErrorStyle::Json),
    }
}

#[utoipa::path(
    get,
    path = "/auth/session",
    responses (
        (status = 200, description = "An authenticated session exists", body = SessionResponse),
        (status = 204, description = "No session")
    ),
    tag = "auth",
)]
/// Resolve the current session, if any.
pub async fn session(
    Extension(kit): Extension<AuthKit>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let Ok(url) = origins::absolute_request_url(&headers, &uri, kit.secure_cookies()) else {
        return StatusCode::NO_CONTENT.into_response();
    };

    match kit.find_authenticated_user(&headers, &url) {
        Some(user) => Json(SessionResponse {
            user_id: user.id,
            email: user.email,
            provider: user.provider,
        })
        .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// How a handler surfaces failures: browsers mid-redirect get bounced to the
/// login page, API callers get a status code.
#[derive(Clone, Copy)]
enum ErrorStyle {
    Redirect,
    Json,
}

fn error_response(err: &Error, style: ErrorStyle) -> Response {
    match err {
        Error::Configuration(reason) => {
            error!("Authentication misconfiguration: {reason}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": "internal error" })),
            )
                .into_response()
        }
        Error::Authorization(reason) => {
            debug!("Login rejected: {reason}");
            match style {
                ErrorStyle::Redirect => login_error_redirect(),
                ErrorStyle::Json => (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "message": reason })),
                )
                    .into_response(),
            }
        }
        Error::Transport(reason) => {
            error!("Upstream identity service unreachable: {reason}");
            match style {
                ErrorStyle::Redirect => login_error_redirect(),
                ErrorStyle::Json => (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "message": "upstream identity service unreachable" })),
                )
                    .into_response(),
            }
        }
    }
}

fn login_error_redirect() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, HeaderValue::from_static(LOGIN_ERROR_LOCATION));
    (StatusCode::FOUND, headers).into_response()
}
