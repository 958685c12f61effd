// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Management API routes.
//
// Handlers that touch the print head hand the arbiter call to the blocking
// pool; the device lock is never held on an async worker.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use chrono::{DateTime, Local};
use printhead_core::{
    BRIGHTNESS_RANGE, CutMode, PrintSettings, SharedSettings, StatusKind, current_settings,
};
use printhead_device::{DeviceArbiter, escpos};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::auth::{AdminAccount, TokenStore, extract_bearer, require_auth};
use crate::error::{ApiError, ApiResponse, ApiResult};

/// Lines fed by `/api/print/feed`.
pub const FEED_LINES: u8 = 4;

/// Characters per line in the default font across the head.
const LINE_CHARS: usize = 48;

/// Static facts reported by `/api/device`.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub printer_name: String,
    pub ipp_port: u16,
    pub raw_port: u16,
    pub api_port: u16,
    pub started: Instant,
}

/// Shared state for every handler.
#[derive(Clone)]
pub struct ApiState {
    pub device: Arc<DeviceArbiter>,
    pub settings: SharedSettings,
    pub tokens: Arc<TokenStore>,
    pub account: Arc<AdminAccount>,
    pub info: Arc<DeviceInfo>,
}

/// Build the API router with authentication, CORS, and request tracing.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/password", post(change_password))
        .route("/api/status", get(status))
        .route("/api/print/test", post(print_test))
        .route("/api/print/feed", post(feed))
        .route("/api/print/cut", post(cut))
        .route("/api/device", get(device_info))
        .route("/api/settings", get(get_settings).put(update_settings))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Run `action` on the blocking pool after readying the device.
async fn with_device<T, F>(state: &ApiState, action: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&DeviceArbiter, PrintSettings) -> Result<T, ApiError> + Send + 'static,
{
    let device = Arc::clone(&state.device);
    let settings = current_settings(&state.settings);
    tokio::task::spawn_blocking(move || {
        if !device.ensure_ready(settings.brightness) {
            return Err(ApiError::DeviceUnavailable);
        }
        action(&device, settings)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("device task: {e}")))?
}

fn written(ok: bool, what: &str) -> Result<(), ApiError> {
    if ok {
        Ok(())
    } else {
        Err(ApiError::Internal(format!("{what} failed")))
    }
}

fn message(text: &str) -> Value {
    json!({ "message": text })
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub require_password_change: bool,
}

async fn login(
    State(state): State<ApiState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    if !state.account.verify(&req.username, &req.password) {
        info!(username = %req.username, "login rejected");
        return Err(ApiError::InvalidCredentials);
    }
    let token = state.tokens.issue();
    info!(username = %req.username, sessions = state.tokens.len(), "login accepted");
    Ok(ApiResponse::ok(LoginResponse {
        token,
        require_password_change: state.account.requires_password_change(),
    }))
}

async fn logout(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<Value> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(extract_bearer)
    {
        state.tokens.revoke(token);
    }
    Ok(ApiResponse::ok(message("logged out")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordRequest {
    pub current_password: Option<String>,
    pub new_password: String,
}

async fn change_password(
    State(state): State<ApiState>,
    Json(req): Json<PasswordRequest>,
) -> ApiResult<Value> {
    state
        .account
        .change_password(req.current_password.as_deref(), &req.new_password)?;
    Ok(ApiResponse::ok(message("password changed")))
}

// ---------------------------------------------------------------------------
// Printer
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub is_open: bool,
    pub paper: i32,
    pub cover: i32,
    pub overheat: i32,
}

/// Sensor readings.  Does not open the device: a closed head reports the
/// not-open sentinel for every sensor.
async fn status(State(state): State<ApiState>) -> ApiResult<StatusResponse> {
    let device = Arc::clone(&state.device);
    let status = tokio::task::spawn_blocking(move || StatusResponse {
        is_open: device.is_open(),
        paper: device.status(StatusKind::Paper),
        cover: device.status(StatusKind::Cover),
        overheat: device.status(StatusKind::Overheat),
    })
    .await
    .map_err(|e| ApiError::Internal(format!("device task: {e}")))?;
    Ok(ApiResponse::ok(status))
}

/// ESC/POS bytes for the diagnostic page, without the final cut.
pub fn test_page(info: &DeviceInfo, now: DateTime<Local>) -> Vec<u8> {
    let rule = "=".repeat(LINE_CHARS);
    let body = format!(
        "{rule}\n{}\nIPP  port {}\nRAW  port {}\nAPI  port {}\nversion {}\n{}\n{rule}\n",
        info.printer_name,
        info.ipp_port,
        info.raw_port,
        info.api_port,
        env!("CARGO_PKG_VERSION"),
        now.format("%Y-%m-%d %H:%M:%S"),
    );
    escpos::combine(&[
        &escpos::justify(escpos::Justify::Center),
        &escpos::bold(true),
        &escpos::char_size(2, 2),
        b"TEST PAGE\n",
        &escpos::char_size_normal(),
        &escpos::bold(false),
        &escpos::justify(escpos::Justify::Left),
        body.as_bytes(),
        &escpos::justify(escpos::Justify::Center),
        &escpos::qr_code(6, &info.printer_name),
        &escpos::line_feed(),
        &escpos::justify(escpos::Justify::Left),
    ])
}

async fn print_test(State(state): State<ApiState>) -> ApiResult<Value> {
    let page = test_page(&state.info, Local::now());
    with_device(&state, move |device, settings| {
        written(device.write(&page), "test page")?;
        written(device.feed_and_cut(settings.cut_mode.is_full()), "cut")
    })
    .await?;
    info!("test page printed");
    Ok(ApiResponse::ok(message("test page printed")))
}

async fn feed(State(state): State<ApiState>) -> ApiResult<Value> {
    with_device(&state, |device, _| {
        written(device.write(&escpos::feed_lines(FEED_LINES)), "feed")
    })
    .await?;
    Ok(ApiResponse::ok(message("paper fed")))
}

async fn cut(State(state): State<ApiState>) -> ApiResult<Value> {
    with_device(&state, |device, settings| {
        written(device.feed_and_cut(settings.cut_mode.is_full()), "cut")
    })
    .await?;
    Ok(ApiResponse::ok(message("paper cut")))
}

// ---------------------------------------------------------------------------
// Device and settings
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct Ports {
    pub ipp: u16,
    pub raw: u16,
    pub api: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfoResponse {
    pub hostname: String,
    pub printer_name: String,
    pub version: String,
    pub uptime: String,
    pub uptime_secs: u64,
    pub ports: Ports,
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_owned())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".into())
}

/// `"<h>h <m>m"`.
pub fn format_uptime(secs: u64) -> String {
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
}

async fn device_info(State(state): State<ApiState>) -> ApiResult<DeviceInfoResponse> {
    let uptime_secs = state.info.started.elapsed().as_secs();
    Ok(ApiResponse::ok(DeviceInfoResponse {
        hostname: hostname(),
        printer_name: state.info.printer_name.clone(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime: format_uptime(uptime_secs),
        uptime_secs,
        ports: Ports {
            ipp: state.info.ipp_port,
            raw: state.info.raw_port,
            api: state.info.api_port,
        },
    }))
}

async fn get_settings(State(state): State<ApiState>) -> ApiResult<PrintSettings> {
    Ok(ApiResponse::ok(current_settings(&state.settings)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub cut_mode: Option<CutMode>,
    pub brightness: Option<u8>,
}

/// Update settings in memory.  A brightness change is sent to the head
/// straight away if it is already open; otherwise it applies on first open.
async fn update_settings(
    State(state): State<ApiState>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<PrintSettings> {
    if let Some(level) = update.brightness {
        if !BRIGHTNESS_RANGE.contains(&level) {
            return Err(ApiError::BadRequest(format!(
                "brightness {level} outside {}-{}",
                BRIGHTNESS_RANGE.start(),
                BRIGHTNESS_RANGE.end()
            )));
        }
    }

    let updated = {
        let mut settings = state.settings.write().unwrap_or_else(|p| p.into_inner());
        if let Some(mode) = update.cut_mode {
            settings.cut_mode = mode;
        }
        if let Some(level) = update.brightness {
            settings.brightness = level;
        }
        *settings
    };
    debug!(?updated, "settings updated");

    if let Some(level) = update.brightness {
        let device = Arc::clone(&state.device);
        tokio::task::spawn_blocking(move || {
            if device.is_open() {
                device.write(&escpos::set_brightness(level));
            }
        })
        .await
        .map_err(|e| ApiError::Internal(format!("device task: {e}")))?;
    }

    Ok(ApiResponse::ok(updated))
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use printhead_core::config::DEFAULT_ADMIN_PASSWORD;
    use printhead_core::{AppConfig, STATUS_NOT_OPEN};
    use printhead_device::RecordingTransport;
    use std::sync::RwLock;
    use tower::ServiceExt;

    fn test_state() -> (ApiState, RecordingTransport) {
        let transport = RecordingTransport::new();
        let state = ApiState {
            device: Arc::new(DeviceArbiter::new(transport.clone())),
            settings: Arc::new(RwLock::new(PrintSettings::default())),
            tokens: Arc::new(TokenStore::new()),
            account: Arc::new(AdminAccount::new(AppConfig::default(), None)),
            info: Arc::new(DeviceInfo {
                printer_name: "Kiosk".into(),
                ipp_port: 6631,
                raw_port: 9100,
                api_port: 8080,
                started: Instant::now(),
            }),
        };
        (state, transport)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn login(app: &Router) -> String {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "username": "admin", "password": DEFAULT_ADMIN_PASSWORD })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["requirePasswordChange"], true);
        body["data"]["token"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn api_requires_token() {
        let (state, _) = test_state();
        let app = router(state);
        let (status, body) = send(&app, Method::GET, "/api/status", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let (status, _) = send(&app, Method::GET, "/api/status", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // unknown API paths are still behind auth
        let (status, _) = send(&app, Method::GET, "/api/nope", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bad_login_is_rejected() {
        let (state, _) = test_state();
        let app = router(state.clone());
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "username": "admin", "password": "guess" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert!(state.tokens.is_empty());
    }

    #[tokio::test]
    async fn status_reports_closed_device_without_opening() {
        let (state, transport) = test_state();
        let app = router(state);
        let token = login(&app).await;
        let (status, body) = send(&app, Method::GET, "/api/status", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isOpen"], false);
        assert_eq!(body["data"]["paper"], STATUS_NOT_OPEN);
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn feed_and_cut_reach_the_device() {
        let (state, transport) = test_state();
        let app = router(state);
        let token = login(&app).await;

        let (status, _) = send(&app, Method::POST, "/api/print/feed", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, Method::POST, "/api/print/cut", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["message"], "paper cut");

        let writes = transport.writes();
        assert_eq!(
            writes[0],
            escpos::combine(&[&escpos::initialize(), &escpos::set_brightness(4)])
        );
        assert_eq!(writes[1], escpos::feed_lines(FEED_LINES));
        assert_eq!(writes[2], escpos::feed_and_cut(true));
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test]
    async fn test_page_ends_with_configured_cut() {
        let (state, transport) = test_state();
        state.settings.write().unwrap().cut_mode = CutMode::Partial;
        let app = router(state);
        let token = login(&app).await;

        let (status, _) = send(&app, Method::POST, "/api/print/test", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let writes = transport.writes();
        assert_eq!(writes.len(), 3);
        assert!(String::from_utf8_lossy(&writes[1]).contains("TEST PAGE"));
        assert_eq!(writes[2], escpos::feed_and_cut(false));
    }

    #[tokio::test]
    async fn unavailable_device_is_503() {
        let (mut state, _) = test_state();
        state.device = Arc::new(DeviceArbiter::new(RecordingTransport::unavailable()));
        let app = router(state);
        let token = login(&app).await;
        let (status, body) = send(&app, Method::POST, "/api/print/cut", Some(&token), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn settings_round_trip_in_memory() {
        let (state, _) = test_state();
        let app = router(state.clone());
        let token = login(&app).await;

        let (status, body) = send(
            &app,
            Method::PUT,
            "/api/settings",
            Some(&token),
            Some(json!({ "cutMode": "partial", "brightness": 6 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["cutMode"], "partial");

        let (_, body) = send(&app, Method::GET, "/api/settings", Some(&token), None).await;
        assert_eq!(body["data"]["brightness"], 6);
        assert_eq!(current_settings(&state.settings).cut_mode, CutMode::Partial);

        let (status, _) = send(
            &app,
            Method::PUT,
            "/api/settings",
            Some(&token),
            Some(json!({ "brightness": 12 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn logout_revokes_token() {
        let (state, _) = test_state();
        let app = router(state);
        let token = login(&app).await;
        let (status, _) = send(&app, Method::POST, "/api/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, Method::GET, "/api/device", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn forced_password_change_then_login() {
        let (state, _) = test_state();
        let app = router(state);
        let token = login(&app).await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/auth/password",
            Some(&token),
            Some(json!({ "newPassword": "changed" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "username": "admin", "password": "changed" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["requirePasswordChange"], false);
    }

    #[tokio::test]
    async fn device_info_and_unknown_route() {
        let (state, _) = test_state();
        let app = router(state);
        let token = login(&app).await;
        let (status, body) = send(&app, Method::GET, "/api/device", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["printerName"], "Kiosk");
        assert_eq!(body["data"]["ports"]["raw"], 9100);

        let (status, body) = send(&app, Method::GET, "/api/nope", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "API not found");
    }

    #[tokio::test]
    async fn cors_preflight_skips_auth() {
        let (state, _) = test_state();
        let app = router(state);
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/status")
            .header(header::ORIGIN, "http://kiosk.local")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[test]
    fn uptime_format() {
        assert_eq!(format_uptime(0), "0h 0m");
        assert_eq!(format_uptime(3 * 3600 + 25 * 60 + 59), "3h 25m");
    }
}
