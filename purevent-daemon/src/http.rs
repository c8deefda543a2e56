/**
 * HTTP FACADE - REST API of the gateway daemon
 *
 * ROLE:
 * Read-only views over the registry, history and transport, plus the two
 * write paths: command submission and device registration.
 *
 * ROUTES:
 * - GET  /health                 liveness + link counters
 * - GET  /api/status             running/connected + all devices
 * - GET  /api/devices            all devices
 * - GET  /api/devices/{id}       one device, 404 if unknown
 * - POST /api/commands           {device_id, command, parameters?}
 * - GET  /api/history?limit=N    most recent N entries (default 100)
 * - POST /api/config/devices     {device_id, device_type, enabled?}
 * - GET  /api/config             persisted devices_config.json
 * - GET  /api/profiles           supported device profiles
 *
 * Handlers never hold a lock across an await. The serial write of a command
 * runs on the blocking pool.
 */

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{error, info};

use crate::commands::{CommandPath, CommandRequest};
use crate::health::{HealthCounters, HealthTracker};
use crate::history::HistoryStore;
use crate::models::{format_address, parse_address, DeviceProfile, DeviceType, Eep, HistoryEntry, Measurements};
use crate::registry::{Device, DeviceRegistry};
use crate::store;
use crate::transport::{LinkState, SerialTransport};

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
    pub history: Arc<HistoryStore>,
    pub transport: Arc<SerialTransport>,
    pub commands: CommandPath,
    pub health: HealthTracker,
}

#[derive(Debug, Serialize)]
pub struct DeviceView {
    pub device_id: String,
    pub device_type: DeviceType,
    pub name: String,
    pub enabled: bool,
    pub data: Measurements,
    pub last_update: Option<String>,
}

fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}

fn now() -> String {
    rfc3339(OffsetDateTime::now_utc())
}

fn to_view(d: &Device) -> DeviceView {
    DeviceView {
        device_id: d.device_id.clone(),
        device_type: d.device_type.clone(),
        name: d.name().to_string(),
        enabled: d.enabled,
        data: d.state.clone(),
        last_update: d.last_update.map(rfc3339),
    }
}

fn error_body(code: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<Value>) {
    (code, Json(json!({ "error": msg.into() })))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/api/status", get(get_status))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/{id}", get(get_device))
        .route("/api/commands", post(send_command))
        .route("/api/history", get(get_history))
        .route("/api/config", get(get_config))
        .route("/api/config/devices", post(register_device))
        .route("/api/profiles", get(list_profiles))
        .with_state(app_state)
}

#[derive(Debug, Serialize)]
pub struct HealthView {
    pub status: &'static str,
    pub running: bool,
    pub connected: bool,
    pub halted: bool,
    pub link_state: LinkState,
    #[serde(flatten)]
    pub counters: HealthCounters,
    pub timestamp: String,
}

// GET /health
async fn get_health(State(app): State<AppState>) -> Json<HealthView> {
    Json(HealthView {
        status: "ok",
        running: app.transport.is_running(),
        connected: app.transport.is_connected(),
        halted: app.transport.is_halted(),
        link_state: app.transport.state(),
        counters: app.health.counters(),
        timestamp: now(),
    })
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub running: bool,
    pub connected: bool,
    pub devices: Vec<DeviceView>,
    pub timestamp: String,
}

// GET /api/status
async fn get_status(State(app): State<AppState>) -> Json<StatusView> {
    Json(StatusView {
        running: app.transport.is_running(),
        connected: app.transport.is_connected(),
        devices: app.registry.list().iter().map(to_view).collect(),
        timestamp: now(),
    })
}

// GET /api/devices
async fn list_devices(State(app): State<AppState>) -> Json<Value> {
    let devices: Vec<DeviceView> = app.registry.list().iter().map(to_view).collect();
    Json(json!({ "devices": devices }))
}

// GET /api/devices/{id}
async fn get_device(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<DeviceView>, (StatusCode, Json<Value>)> {
    match app.registry.get(&id) {
        Some(device) => Ok(Json(to_view(&device))),
        None => Err(error_body(StatusCode::NOT_FOUND, "Device not found")),
    }
}

fn required_str<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

// POST /api/commands
async fn send_command(State(app): State<AppState>, payload: Result<Json<Value>, JsonRejection>) -> (StatusCode, Json<Value>) {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_body(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let (Some(device_id), Some(command)) = (required_str(&body, "device_id"), required_str(&body, "command")) else {
        return error_body(StatusCode::BAD_REQUEST, "Missing device_id or command");
    };

    let request = CommandRequest {
        device_id: device_id.to_string(),
        command: command.to_string(),
        parameters: body.get("parameters").filter(|p| !p.is_null()).cloned(),
    };
    let commands = app.commands.clone();
    let submitted = request.clone();
    match tokio::task::spawn_blocking(move || commands.submit(&submitted)).await {
        Ok(success) => (
            StatusCode::OK,
            Json(json!({ "success": success, "device_id": request.device_id, "command": request.command })),
        ),
        Err(e) => {
            error!("command task failed: {}", e);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryView {
    pub history: Vec<HistoryEntry>,
    pub total: usize,
}

// GET /api/history?limit=N
async fn get_history(
    State(app): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<HistoryView>, (StatusCode, Json<Value>)> {
    let limit = match params.get("limit") {
        None => DEFAULT_HISTORY_LIMIT,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| error_body(StatusCode::BAD_REQUEST, format!("Invalid limit: {raw}")))?,
    };
    Ok(Json(HistoryView { history: app.history.query(limit), total: app.history.len() }))
}

// POST /api/config/devices
async fn register_device(
    State(app): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_body(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let (Some(device_id), Some(device_type)) = (required_str(&body, "device_id"), required_str(&body, "device_type")) else {
        return error_body(StatusCode::BAD_REQUEST, "Missing device_id or device_type");
    };
    let enabled = body.get("enabled").and_then(Value::as_bool).unwrap_or(true);
    // same form as ids created from received frames
    let device_id = parse_address(device_id).map(format_address).unwrap_or_else(|| device_id.to_string());

    let device = app.registry.register_with(&device_id, DeviceType::from(device_type), enabled);
    let registry = app.registry.clone();
    match tokio::task::spawn_blocking(move || registry.save_config()).await {
        Ok(Ok(())) => {
            info!("device {} configured as {}", device.device_id, device.device_type);
            (
                StatusCode::OK,
                Json(json!({ "success": true, "device_id": device.device_id, "device_type": device.device_type })),
            )
        }
        Ok(Err(e)) => {
            error!("failed to save device configuration: {}", e);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// GET /api/config
async fn get_config(State(app): State<AppState>) -> Json<Value> {
    let Some(path) = app.registry.config_file() else { return Json(json!({})) };
    match store::load_json::<Value>(path) {
        Ok(Some(config)) => Json(config),
        Ok(None) => Json(json!({})),
        Err(e) => {
            error!("failed to read {}: {}", path.display(), e);
            Json(json!({}))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub eep: Eep,
}

// GET /api/profiles
async fn list_profiles() -> Json<Vec<ProfileView>> {
    Json(
        DeviceProfile::ALL
            .iter()
            .map(|p| ProfileView { code: p.code(), name: p.name(), description: p.description(), eep: p.eep() })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SerialSettings;
    use crate::models::{FrameType, Measurement, Reading};
    use crate::transport::{Connector, GatewayLink, Sleeper, TransportError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Offline(AtomicUsize);
    impl Connector for Offline {
        fn open(&self, _settings: &SerialSettings) -> Result<Arc<dyn GatewayLink>, TransportError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Unavailable("offline".into()))
        }
    }

    struct NoSleep;
    impl Sleeper for NoSleep {
        fn sleep(&self, _duration: Duration) {}
    }

    fn app(dir: &std::path::Path) -> (AppState, Arc<Offline>) {
        let connector = Arc::new(Offline(AtomicUsize::new(0)));
        let transport = Arc::new(SerialTransport::new(SerialSettings::default(), connector.clone(), Arc::new(NoSleep)));
        let state = AppState {
            registry: Arc::new(DeviceRegistry::new().with_config_file(dir.join("devices_config.json"))),
            history: Arc::new(HistoryStore::new(100)),
            commands: CommandPath::new(transport.clone(), 0),
            health: transport.health().clone(),
            transport,
        };
        (state, connector)
    }

    fn co2_reading(id: &str, ppm: f64) -> Reading {
        let mut measurements = Measurements::new();
        measurements.insert("co2_ppm".into(), Measurement::Number(ppm));
        Reading { device_id: id.into(), measurements, frame_type: FrameType::FourByte, timestamp: OffsetDateTime::now_utc() }
    }

    #[tokio::test]
    async fn test_unknown_device_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = app(dir.path());
        let err = get_device(State(state), Path("DEADBEEF".into())).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
        assert_eq!(err.1 .0["error"], "Device not found");
    }

    #[tokio::test]
    async fn test_device_view_shows_merged_state() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = app(dir.path());
        state.registry.register("0185A3F2", DeviceType::from("A5-09-04"));
        state.registry.merge("0185A3F2", &co2_reading("0185A3F2", 812.3));

        let Json(view) = get_device(State(state), Path("0185A3F2".into())).await.unwrap();
        assert_eq!(view.name, "Capteur CO2");
        assert_eq!(view.data["co2_ppm"], Measurement::Number(812.3));
        assert!(view.last_update.is_some());
    }

    #[tokio::test]
    async fn test_command_missing_fields_never_reaches_transport() {
        let dir = tempfile::tempdir().unwrap();
        let (state, connector) = app(dir.path());
        let (code, Json(body)) = send_command(State(state), Ok(Json(json!({ "device_id": "0185A3F2" })))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing device_id or command");
        assert_eq!(connector.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_command_while_offline_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = app(dir.path());
        let (code, Json(body)) =
            send_command(State(state), Ok(Json(json!({ "device_id": "0185A3F2", "command": "0x31" })))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["command"], "0x31");
    }

    #[tokio::test]
    async fn test_history_limit() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = app(dir.path());
        for n in 0..5 {
            state.history.append(HistoryEntry::from(&co2_reading("01", n as f64)));
        }
        let params = HashMap::from([("limit".to_string(), "2".to_string())]);
        let Json(view) = get_history(State(state.clone()), Query(params)).await.unwrap();
        assert_eq!(view.history.len(), 2);
        assert_eq!(view.total, 5);
        assert_eq!(view.history[1].data["co2_ppm"], Measurement::Number(4.0));

        let bad = HashMap::from([("limit".to_string(), "lots".to_string())]);
        assert_eq!(get_history(State(state), Query(bad)).await.unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_register_persists_config() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = app(dir.path());
        let (code, Json(body)) = register_device(
            State(state.clone()),
            Ok(Json(json!({ "device_id": "0000ABCD", "device_type": "A5-04-01" }))),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["device_type"], "A5-04-01");

        let Json(config) = get_config(State(state.clone())).await;
        assert_eq!(config["0000ABCD"]["device_type"], "A5-04-01");
        assert_eq!(config["0000ABCD"]["enabled"], true);

        let (code, _) = register_device(State(state), Ok(Json(json!({ "device_id": "0000ABCD" })))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_register_canonicalizes_radio_address() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = app(dir.path());
        for id in ["0185a3f2", "185A3F2", "0x0185A3F2"] {
            let (code, Json(body)) = register_device(
                State(state.clone()),
                Ok(Json(json!({ "device_id": id, "device_type": "A5-04-01" }))),
            )
            .await;
            assert_eq!(code, StatusCode::OK);
            assert_eq!(body["device_id"], "0185A3F2");
        }
        assert_eq!(state.registry.len(), 1);
        assert_eq!(state.registry.profile_of("0185A3F2"), Some(DeviceProfile::ClimateSensor));

        let (code, Json(body)) = register_device(
            State(state.clone()),
            Ok(Json(json!({ "device_id": "living-room", "device_type": "custom" }))),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["device_id"], "living-room");
    }

    #[tokio::test]
    async fn test_health_reports_offline_transport() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = app(dir.path());
        let Json(health) = get_health(State(state)).await;
        assert_eq!(health.status, "ok");
        assert!(!health.running);
        assert!(!health.halted);
        assert_eq!(health.link_state, LinkState::Disconnected);
    }
}
