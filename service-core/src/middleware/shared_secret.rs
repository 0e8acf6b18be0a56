//! Shared-secret authentication for scheduler-triggered endpoints.
//!
//! Batch endpoints are invoked by an external cron scheduler rather than an
//! interactive user, so they are guarded by a single pre-shared secret
//! carried in a request header. Comparison is constant-time.

use crate::error::AppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use secrecy::{ExposeSecret, Secret};
use subtle::ConstantTimeEq;

/// Expected secret plus the header it is read from.
#[derive(Clone)]
pub struct SharedSecret {
    header: &'static str,
    secret: Secret<String>,
}

impl SharedSecret {
    pub fn new(header: &'static str, secret: Secret<String>) -> Self {
        Self { header, secret }
    }

    pub fn header(&self) -> &'static str {
        self.header
    }

    /// Constant-time check of a presented secret.
    pub fn verify(&self, presented: &str) -> bool {
        let expected = self.secret.expose_secret().as_bytes();
        presented.as_bytes().ct_eq(expected).into()
    }
}

/// Reject the request with 401 before any work unless the shared-secret
/// header is present and matches.
pub async fn shared_secret_middleware(
    State(expected): State<SharedSecret>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = req
        .headers()
        .get(expected.header())
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            AppError::AuthError(anyhow::anyhow!(
                "Missing header: {}",
                expected.header()
            ))
        })?;

    if !expected.verify(presented) {
        return Err(AppError::AuthError(anyhow::anyhow!("Invalid secret")));
    }

    Ok(next.run(req).await)
}
