//! Authentication and viewer roles.
//!
//! The API is gated by a pre-shared key compared in constant time. On top
//! of that, the `x-user-id` header names the member looking at the page;
//! only approved staff may edit or restore.

use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::remote::RemoteRecordStore;
use crate::AppState;

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header carrying the id of the member using the client.
pub const USER_ID_HEADER: &str = "x-user-id";

/// PSK authentication layer function that takes the expected PSK as a parameter.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    // No PSK configured: dev mode
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match provided {
        Some(provided_key) => {
            if constant_time_compare(&provided_key, &expected) {
                next.run(request).await
            } else {
                unauthorized_response("Invalid API key")
            }
        }
        None => {
            let bearer = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .map(|s| s.to_string());

            match bearer {
                Some(bearer_key) if constant_time_compare(&bearer_key, &expected) => {
                    next.run(request).await
                }
                _ => unauthorized_response("Missing or invalid API key"),
            }
        }
    }
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn unauthorized_response(message: &str) -> Response {
    AppError::Unauthorized(message.to_string()).into_response()
}

/// Who is looking at the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: Option<String>,
    pub privileged: bool,
}

impl Viewer {
    pub fn anonymous() -> Self {
        Self {
            id: None,
            privileged: false,
        }
    }

    /// Fail unless the viewer is approved staff.
    pub fn require_privileged(&self) -> Result<(), AppError> {
        match (&self.id, self.privileged) {
            (_, true) => Ok(()),
            (None, false) => Err(AppError::Unauthorized(format!(
                "Missing {} header",
                USER_ID_HEADER
            ))),
            (Some(id), false) => Err(AppError::Forbidden(format!(
                "User {} is not approved staff",
                id
            ))),
        }
    }

    /// Members may read their own profile; staff may read anyone's.
    pub fn require_access(&self, member_id: &str) -> Result<(), AppError> {
        if self.id.as_deref() == Some(member_id) {
            return Ok(());
        }
        self.require_privileged()
    }
}

/// Resolve the viewer named by the request headers. A missing header is an
/// anonymous viewer; an id that matches no member is rejected.
pub async fn resolve_viewer(
    remote: &dyn RemoteRecordStore,
    headers: &HeaderMap,
) -> Result<Viewer, AppError> {
    let Some(user_id) = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return Ok(Viewer::anonymous());
    };

    match remote.get_record(user_id).await? {
        Some(user) => {
            tracing::debug!(user_id, privileged = user.is_privileged(), "Viewer resolved");
            Ok(Viewer {
                id: Some(user_id.to_string()),
                privileged: user.is_privileged(),
            })
        }
        None => Err(AppError::Unauthorized(format!("Unknown user {}", user_id))),
    }
}

impl FromRequestParts<AppState> for Viewer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve_viewer(state.services.remote.as_ref(), &parts.headers).await
    }
}
