//! Axum handlers. Every handler translates a JSON request into one
//! Controller call and runs that call through `spawn_blocking`, since the
//! Controller's operations are synchronous and may block on the bus lock.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;

use crate::controller::Controller;
use crate::error::Error;

use super::dto::*;
use super::error::AppError;

pub type AppState = Arc<Controller>;

async fn run_blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError(Error::Internal(format!("blocking task panicked: {e}"))))?
        .map_err(AppError)
}

pub async fn connect(State(state): State<AppState>, Json(req): Json<ConnectRequest>) -> Result<Json<SimpleSuccess>, AppError> {
    run_blocking(move || state.connect(&req.port, req.baudrate)).await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn disconnect(State(state): State<AppState>) -> Json<SimpleSuccess> {
    tokio::task::spawn_blocking(move || state.disconnect()).await.ok();
    Json(SimpleSuccess::ok())
}

pub async fn discover(
    State(state): State<AppState>,
    Json(req): Json<DiscoverRequest>,
) -> Result<Json<DiscoverResponse>, AppError> {
    let found = run_blocking(move || state.discover(req.start_id, req.end_id)).await?;
    let servos = found
        .values()
        .map(|d| (d.id.get().to_string(), DiscoveredServoDto::from(d)))
        .collect();
    Ok(Json(DiscoverResponse { success: true, servos }))
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let (connected, port, baud) = match state.connection_state() {
        crate::servo::ConnectionState::Open { port, baud } => (true, Some(port), Some(baud)),
        crate::servo::ConnectionState::Disconnected => (false, None, None),
    };
    let discovered = state.discovered().keys().map(|id| id.get()).collect();
    Json(StatusResponse {
        success: true,
        connected,
        port,
        baud,
        discovered,
    })
}

pub async fn ports() -> Json<serde_json::Value> {
    let names: Vec<String> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|p| p.port_name)
        .collect();
    Json(json!({ "success": true, "ports": names }))
}

pub async fn telemetry(
    State(state): State<AppState>,
    Path(raw_id): Path<u8>,
) -> Result<Json<TelemetryResponse>, AppError> {
    let id = parse_id(raw_id).map_err(AppError)?;
    let snap = run_blocking(move || state.telemetry(id)).await?;
    Ok(Json(TelemetryResponse::from_snapshot(id, &snap)))
}

pub async fn telemetry_all(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let ids: Vec<_> = state.discovered().keys().copied().collect();
    let mut out = HashMap::new();
    for id in ids {
        let state = state.clone();
        if let Ok(snap) = run_blocking(move || state.telemetry(id)).await {
            out.insert(id.get().to_string(), TelemetryResponse::from_snapshot(id, &snap));
        }
    }
    Ok(Json(json!({ "success": true, "telemetry": out })))
}

pub async fn set_position(
    State(state): State<AppState>,
    Json(req): Json<PositionRequest>,
) -> Result<Json<SimpleSuccess>, AppError> {
    let id = parse_id(req.servo_id).map_err(AppError)?;
    run_blocking(move || state.set_position(id, req.position, req.speed, req.acceleration)).await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn set_speed(
    State(state): State<AppState>,
    Json(req): Json<SpeedRequest>,
) -> Result<Json<SimpleSuccess>, AppError> {
    let id = parse_id(req.servo_id).map_err(AppError)?;
    run_blocking(move || state.set_speed(id, req.speed)).await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn set_acceleration(
    State(state): State<AppState>,
    Json(req): Json<AccelerationRequest>,
) -> Result<Json<SimpleSuccess>, AppError> {
    let id = parse_id(req.servo_id).map_err(AppError)?;
    run_blocking(move || state.set_acceleration(id, req.acceleration)).await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn set_speed_acceleration(
    State(state): State<AppState>,
    Json(req): Json<SpeedAccelerationRequest>,
) -> Result<Json<SimpleSuccess>, AppError> {
    let id = parse_id(req.servo_id).map_err(AppError)?;
    run_blocking(move || {
        state.set_speed(id, req.speed)?;
        state.set_acceleration(id, req.acceleration)
    })
    .await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn enable_torque(
    State(state): State<AppState>,
    Path(raw_id): Path<u8>,
) -> Result<Json<SimpleSuccess>, AppError> {
    let id = parse_id(raw_id).map_err(AppError)?;
    run_blocking(move || state.set_torque(id, true)).await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn disable_torque(
    State(state): State<AppState>,
    Path(raw_id): Path<u8>,
) -> Result<Json<SimpleSuccess>, AppError> {
    let id = parse_id(raw_id).map_err(AppError)?;
    run_blocking(move || state.set_torque(id, false)).await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn change_id(
    State(state): State<AppState>,
    Json(req): Json<ChangeIdRequest>,
) -> Result<Json<SimpleSuccess>, AppError> {
    let old = parse_id(req.old_id).map_err(AppError)?;
    let new = parse_id(req.new_id).map_err(AppError)?;
    run_blocking(move || state.change_id(old, new)).await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn start_motion(
    State(state): State<AppState>,
    Json(req): Json<StartMotionRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let configs = req
        .movement_configs
        .into_iter()
        .map(MovementConfigDto::try_into_motion_config)
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError)?;
    let started = run_blocking(move || state.start_motion(configs)).await?;
    let ids: Vec<u8> = started.iter().map(|id| id.get()).collect();
    Ok(Json(json!({ "success": true, "started": ids })))
}

fn parse_ids(raw: Vec<u8>) -> Result<Vec<crate::servo::ServoId>, AppError> {
    raw.into_iter().map(parse_id).collect::<Result<Vec<_>, _>>().map_err(AppError)
}

pub async fn pause(
    State(state): State<AppState>,
    Json(req): Json<ServoIdsRequest>,
) -> Result<Json<SimpleSuccess>, AppError> {
    let ids = parse_ids(req.servo_ids)?;
    run_blocking(move || state.pause(&ids)).await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn resume(
    State(state): State<AppState>,
    Json(req): Json<ServoIdsRequest>,
) -> Result<Json<SimpleSuccess>, AppError> {
    let ids = parse_ids(req.servo_ids)?;
    run_blocking(move || state.resume(&ids)).await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn stop(
    State(state): State<AppState>,
    Json(req): Json<ServoIdsRequest>,
) -> Result<Json<SimpleSuccess>, AppError> {
    let ids = parse_ids(req.servo_ids)?;
    run_blocking(move || state.stop(&ids)).await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn force_stop_all(State(state): State<AppState>) -> Result<Json<SimpleSuccess>, AppError> {
    run_blocking(move || state.force_stop_all()).await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn all_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ids: Vec<u8> = state.discovered().keys().map(|id| id.get()).collect();
    Json(json!({ "success": true, "discovered": ids }))
}

pub async fn real_time_status(
    State(state): State<AppState>,
) -> Result<Json<VerifyPositionsResponse>, AppError> {
    let results = run_blocking(move || Ok(state.verify_servo_positions())).await?;
    Ok(Json(VerifyPositionsResponse {
        success: true,
        results: results.iter().map(PositionVerificationDto::from).collect(),
    }))
}

pub async fn set_offset(
    State(state): State<AppState>,
    Path(raw_id): Path<u8>,
    Json(req): Json<OffsetRequest>,
) -> Result<Json<SimpleSuccess>, AppError> {
    let id = parse_id(raw_id).map_err(AppError)?;
    run_blocking(move || state.set_offset(id, req.offset)).await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn set_angle_limits(
    State(state): State<AppState>,
    Path(raw_id): Path<u8>,
    Json(req): Json<AngleLimitsDto>,
) -> Result<Json<SimpleSuccess>, AppError> {
    let id = parse_id(raw_id).map_err(AppError)?;
    run_blocking(move || state.set_angle_limits(id, req.min, req.max)).await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn set_dead_zone(
    State(state): State<AppState>,
    Path(raw_id): Path<u8>,
    Json(req): Json<DeadZoneRequest>,
) -> Result<Json<SimpleSuccess>, AppError> {
    let id = parse_id(raw_id).map_err(AppError)?;
    run_blocking(move || state.set_dead_zone(id, req.cw_dead, req.ccw_dead)).await?;
    Ok(Json(SimpleSuccess::ok()))
}

pub async fn get_servo_config(
    State(state): State<AppState>,
    Path(raw_id): Path<u8>,
) -> Result<Json<ServoConfigResponse>, AppError> {
    let id = parse_id(raw_id).map_err(AppError)?;
    let config = run_blocking(move || state.get_servo_config(id)).await?;
    Ok(Json(ServoConfigResponse::from_config(id, config)))
}

pub async fn restart_failed(State(state): State<AppState>) -> Result<Json<RestartFailedResponse>, AppError> {
    let results = run_blocking(move || Ok(state.restart_failed_movements())).await?;
    Ok(Json(RestartFailedResponse {
        success: true,
        results: results
            .into_iter()
            .map(|(id, recovered)| RestartedEntry {
                servo_id: id.get(),
                recovered,
            })
            .collect(),
    }))
}

pub async fn verify_positions(
    State(state): State<AppState>,
) -> Result<Json<VerifyPositionsResponse>, AppError> {
    let results = run_blocking(move || Ok(state.verify_servo_positions())).await?;
    Ok(Json(VerifyPositionsResponse {
        success: true,
        results: results.iter().map(PositionVerificationDto::from).collect(),
    }))
}

pub async fn monitor_and_recover(
    State(state): State<AppState>,
) -> Result<Json<RestartFailedResponse>, AppError> {
    restart_failed(State(state)).await
}

pub async fn cleanup_orphaned(State(state): State<AppState>) -> Json<CleanupOrphanedResponse> {
    let cleaned = tokio::task::spawn_blocking(move || state.cleanup_orphaned_threads())
        .await
        .unwrap_or_default();
    Json(CleanupOrphanedResponse {
        success: true,
        cleaned: cleaned.iter().map(|id| id.get()).collect(),
    })
}

pub async fn communication_test(
    State(state): State<AppState>,
    Path(raw_id): Path<u8>,
) -> Result<Json<PingResponse>, AppError> {
    let id = parse_id(raw_id).map_err(AppError)?;
    let model = run_blocking(move || state.ping(id)).await?;
    Ok(Json(PingResponse {
        success: true,
        servo_id: id.get(),
        responded: model.is_some(),
        model_number: model,
    }))
}

pub async fn communication_health(
    State(state): State<AppState>,
    Path(raw_id): Path<u8>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(raw_id).map_err(AppError)?;
    let na_rate = run_blocking(move || Ok(state.na_rate(id))).await?;
    Ok(Json(json!({ "success": true, "servo_id": id.get(), "na_rate": na_rate })))
}

pub async fn recover_communication(
    State(state): State<AppState>,
    Json(req): Json<ServoIdsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let ids = parse_ids(req.servo_ids)?;
    let mut recovered = HashMap::new();
    for id in ids {
        let state = state.clone();
        let ok = run_blocking(move || state.recover_communication(id)).await?;
        recovered.insert(id.get(), ok);
    }
    Ok(Json(json!({ "success": true, "recovered": recovered })))
}

pub async fn reset_communication(
    State(state): State<AppState>,
    Path(raw_id): Path<u8>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(raw_id).map_err(AppError)?;
    let recovered = run_blocking(move || state.recover_communication(id)).await?;
    Ok(Json(json!({ "success": true, "servo_id": id.get(), "recovered": recovered })))
}

pub async fn ping(
    State(state): State<AppState>,
    Path(raw_id): Path<u8>,
) -> Result<Json<PingResponse>, AppError> {
    communication_test(State(state), Path(raw_id)).await
}

pub async fn check_id_availability(
    State(state): State<AppState>,
    Path(raw_id): Path<u8>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(raw_id).map_err(AppError)?;
    let model = run_blocking(move || state.ping(id)).await?;
    Ok(Json(json!({ "success": true, "servo_id": id.get(), "available": model.is_none() })))
}

pub async fn diagnostics(State(state): State<AppState>) -> Json<DiagnosticsResponse> {
    let connected = matches!(state.connection_state(), crate::servo::ConnectionState::Open { .. });
    let discovered_count = state.discovered().len();
    let active_patterns = state.active_pattern_count();
    let na_rates = state
        .discovered()
        .keys()
        .filter_map(|id| state.na_rate(*id).map(|rate| (id.get(), rate)))
        .collect();
    Json(DiagnosticsResponse {
        success: true,
        connected,
        discovered_count,
        active_patterns,
        na_rates,
    })
}

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let connected = matches!(state.connection_state(), crate::servo::ConnectionState::Open { .. });
    Json(json!({ "success": true, "healthy": connected }))
}
