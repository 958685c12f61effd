// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bearer-token authentication for the management API.
//
// There is a single account, `admin`.  Its password lives in the app config
// as a SHA-256 hex digest.  Tokens are random UUIDs held in memory only, so a
// restart logs every client out.  A token also lapses a fixed time after it
// was issued.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, RwLock};

use axum::extract::{Request, State};
use axum::http::{Method, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, TimeDelta, Utc};
use printhead_core::AppConfig;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::ApiState;

/// The only account name accepted at login.
pub const ADMIN_USERNAME: &str = "admin";

/// Paths under `/api/` reachable without a token.
const PUBLIC_PATHS: &[&str] = &["/api/auth/login"];

/// How long a session token stays valid after login.
pub const TOKEN_MAX_AGE: TimeDelta = TimeDelta::hours(24);

/// Issued session tokens and when each was created.
#[derive(Debug)]
pub struct TokenStore {
    tokens: Mutex<HashMap<String, DateTime<Utc>>>,
    max_age: TimeDelta,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::with_max_age(TOKEN_MAX_AGE)
    }
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_age(max_age: TimeDelta) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            max_age,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.tokens.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn is_live(&self, issued: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - issued < self.max_age
    }

    /// Issue a fresh token, dropping any that have lapsed.
    pub fn issue(&self) -> String {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|_, issued| self.is_live(*issued, now));
        if tokens.len() < before {
            debug!(expired = before - tokens.len(), "dropped lapsed tokens");
        }
        tokens.insert(token.clone(), now);
        token
    }

    /// Whether `token` was issued and has not lapsed.  A lapsed token is
    /// removed.
    pub fn validate(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        let mut tokens = self.lock();
        match tokens.get(token) {
            Some(&issued) if self.is_live(issued, Utc::now()) => true,
            Some(_) => {
                tokens.remove(token);
                false
            }
            None => false,
        }
    }

    pub fn issued_at(&self, token: &str) -> Option<DateTime<Utc>> {
        self.lock().get(token).copied()
    }

    /// Returns whether the token was known.
    pub fn revoke(&self, token: &str) -> bool {
        self.lock().remove(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Token from an `Authorization: Bearer <token>` value.  The scheme is
/// matched case-insensitively.
pub fn extract_bearer(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|t| !t.is_empty())
}

/// The admin credentials, backed by the app config.
///
/// Password changes are written to `config_path` when one is set.
#[derive(Debug)]
pub struct AdminAccount {
    config: RwLock<AppConfig>,
    config_path: Option<PathBuf>,
}

impl AdminAccount {
    pub fn new(config: AppConfig, config_path: Option<PathBuf>) -> Self {
        Self {
            config: RwLock::new(config),
            config_path,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, AppConfig> {
        self.config.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        username == ADMIN_USERNAME && self.read().verify_password(password)
    }

    /// True while the factory password is still in use.
    pub fn requires_password_change(&self) -> bool {
        self.read().is_default_password()
    }

    /// Replace the admin password.
    ///
    /// `current` may be omitted only while the factory password is in use,
    /// which is the forced first-login change.
    pub fn change_password(&self, current: Option<&str>, new: &str) -> Result<(), ApiError> {
        if new.is_empty() {
            return Err(ApiError::BadRequest("new password must not be empty".into()));
        }

        let mut config = self.config.write().unwrap_or_else(|p| p.into_inner());
        match current {
            Some(current) if !config.verify_password(current) => {
                warn!("password change rejected: current password mismatch");
                return Err(ApiError::BadRequest("current password is incorrect".into()));
            }
            None if !config.is_default_password() => {
                return Err(ApiError::BadRequest("current password is required".into()));
            }
            _ => {}
        }

        let mut updated = config.clone();
        updated.set_admin_password(new);
        if let Some(path) = &self.config_path {
            updated.persist(path)?;
        }
        *config = updated;
        info!("admin password changed");
        Ok(())
    }
}

/// Rejects `/api/*` requests without a valid bearer token.
///
/// CORS preflights, non-API paths, and the login endpoint pass through.
pub async fn require_auth(
    State(state): State<ApiState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = req.uri().path();
    if req.method() == Method::OPTIONS
        || !path.starts_with("/api/")
        || PUBLIC_PATHS.contains(&path)
    {
        return Ok(next.run(req).await);
    }

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(extract_bearer);

    let authorized = match token {
        Some(token) if state.tokens.validate(token) => true,
        Some(_) => {
            warn!(path = %req.uri().path(), "rejected unknown token");
            false
        }
        None => false,
    };

    if authorized {
        Ok(next.run(req).await)
    } else {
        Err(ApiError::Unauthorized)
    }
}
