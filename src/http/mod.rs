//! HTTP surface.
//!
//! A thin axum router translating the JSON-over-HTTP request surface onto
//! [`crate::controller::Controller`]. Owns no domain state of its own.

mod dto;
mod error;
mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::controller::Controller;

pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/connect", post(handlers::connect))
        .route("/disconnect", post(handlers::disconnect))
        .route("/discover", post(handlers::discover))
        .route("/status", get(handlers::status))
        .route("/ports", get(handlers::ports))
        .route("/telemetry/all", get(handlers::telemetry_all))
        .route("/telemetry/{id}", get(handlers::telemetry))
        .route("/position", post(handlers::set_position))
        .route("/speed", post(handlers::set_speed))
        .route("/acceleration", post(handlers::set_acceleration))
        .route("/speed-acceleration", post(handlers::set_speed_acceleration))
        .route("/enable-torque/{id}", post(handlers::enable_torque))
        .route("/disable-torque/{id}", post(handlers::disable_torque))
        .route("/change_id", post(handlers::change_id))
        .route("/continuous-movement/start", post(handlers::start_motion))
        .route("/continuous-movement/pause", post(handlers::pause))
        .route("/continuous-movement/resume", post(handlers::resume))
        .route("/continuous-movement/stop", post(handlers::stop))
        .route("/continuous-movement/force-stop-all", post(handlers::force_stop_all))
        .route("/continuous-movement/all-status", get(handlers::all_status))
        .route("/continuous-movement/real-time-status", get(handlers::real_time_status))
        .route(
            "/continuous-movement/restart-failed",
            post(handlers::restart_failed),
        )
        .route(
            "/continuous-movement/verify-positions",
            get(handlers::verify_positions),
        )
        .route(
            "/continuous-movement/monitor-and-recover",
            post(handlers::monitor_and_recover),
        )
        .route("/servo/offset/{id}", post(handlers::set_offset))
        .route("/servo/angle-limits/{id}", post(handlers::set_angle_limits))
        .route("/servo/dead-zone/{id}", post(handlers::set_dead_zone))
        .route("/servo/config/{id}", get(handlers::get_servo_config))
        .route(
            "/servo/communication-test/{id}",
            get(handlers::communication_test),
        )
        .route(
            "/servo/communication-health/{id}",
            get(handlers::communication_health),
        )
        .route(
            "/servo/recover-communication",
            post(handlers::recover_communication),
        )
        .route(
            "/servo/reset-communication/{id}",
            post(handlers::reset_communication),
        )
        .route("/servo/ping/{id}", get(handlers::ping))
        .route(
            "/servo/check_id_availability/{id}",
            get(handlers::check_id_availability),
        )
        .route("/system/cleanup-orphaned", post(handlers::cleanup_orphaned))
        .route("/system/diagnostics", get(handlers::diagnostics))
        .route("/system/health-check", get(handlers::health_check))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn status_reports_disconnected_before_any_connect_call() {
        let controller = Arc::new(Controller::new(Duration::from_secs(5)));
        let app = router(controller);

        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn telemetry_without_connection_returns_conflict() {
        let controller = Arc::new(Controller::new(Duration::from_secs(5)));
        let app = router(controller);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/telemetry/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn out_of_range_servo_id_is_a_bad_request() {
        let controller = Arc::new(Controller::new(Duration::from_secs(5)));
        let app = router(controller);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/telemetry/254")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
