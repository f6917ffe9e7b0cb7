use std::{net::SocketAddr, time::Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::logging::logger;
use crate::{
    ads::AdsError,
    app_state::AppState,
    complaints::NewComplaint,
    database::StoreError,
    devices::{ActivityEntry, DeviceRegistration, RegistrationOutcome},
    licenses::LicenseError,
    stations::{ListError, StationFilter},
};

type ApiResponse = Result<Response, ApiError>;

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$")
        .expect("email regex should compile")
});

#[derive(Debug)]
enum ApiError {
    BadRequest(&'static str),
    NotFound(&'static str),
    Forbidden(&'static str),
    ServiceUnavailable(&'static str),
    Internal(anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse { error: message }),
            )
                .into_response(),
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse { error: message }),
            )
                .into_response(),
            ApiError::Forbidden(message) => (
                StatusCode::FORBIDDEN,
                Json(ErrorResponse { error: message }),
            )
                .into_response(),
            ApiError::ServiceUnavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse { error: message }),
            )
                .into_response(),
            ApiError::Internal(error) => {
                logger().error(
                    "internal.error",
                    json!({
                        "error": {
                            "message": error.to_string(),
                            "debug": format!("{:?}", error),
                        }
                    }),
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: "Internal Server Error",
                    }),
                )
                    .into_response()
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable(_) => {
                ApiError::ServiceUnavailable("Database connection failed.")
            }
            StoreError::Query(error) => ApiError::Internal(error.into()),
        }
    }
}

impl From<ListError> for ApiError {
    fn from(error: ListError) -> Self {
        match error {
            ListError::InvalidPage => ApiError::BadRequest("Page number must be 1 or greater."),
            ListError::InvalidLimit => ApiError::BadRequest("Limit must be 1 or greater."),
            ListError::Store(store) => store.into(),
        }
    }
}

impl From<AdsError> for ApiError {
    fn from(error: AdsError) -> Self {
        match error {
            AdsError::NotFound => ApiError::NotFound("Ads config not found."),
            AdsError::Store(store) => store.into(),
        }
    }
}

impl From<LicenseError> for ApiError {
    fn from(error: LicenseError) -> Self {
        match error {
            LicenseError::InvalidPayload => ApiError::BadRequest("Data decryption failed."),
            LicenseError::NotFound => ApiError::NotFound("License key not found."),
            LicenseError::DeviceLimit => ApiError::Forbidden("Device limit reached."),
            LicenseError::Store(store) => store.into(),
        }
    }
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

async fn log_requests(request: Request<Body>, next: Next) -> Response {
    let request_id = extract_request_id(request.headers());
    let method = request.method().clone();
    let raw_url = request.uri().to_string();
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());
    let started_at = Instant::now();

    logger().info(
        "request.received",
        json!({
            "requestId": request_id,
            "method": method.as_str(),
            "rawUrl": raw_url,
            "clientIp": client_ip,
        }),
    );

    let mut response = next.run(request).await;
    let status = response.status().as_u16();
    let duration_ms = started_at.elapsed().as_secs_f64() * 1000.0;

    logger().info(
        "request.completed",
        json!({
            "requestId": request_id,
            "method": method.as_str(),
            "rawUrl": raw_url,
            "statusCode": status,
            "durationMs": duration_ms,
            "clientIp": client_ip,
        }),
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(header::HeaderName::from_static("x-request-id"), value);
    }

    response
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/stations", get(list_stations))
        .route("/analytics/config/global", get(global_ads))
        .route("/analytics/ads/{screen}", get(screen_ads))
        .route("/analytics/device/register", post(register_device))
        .route("/analytics/log", post(record_activity))
        .route("/appconfig", get(app_config))
        .route("/submitcomplaint", post(submit_complaint))
        .route("/getcomplaint/{reference_no}", get(get_complaint))
        .route("/premium/generate-key", post(generate_license))
        .route("/premium/verify-license", post(verify_license))
        .route("/premium/list-devices", post(list_license_devices))
        .route("/premium/remove-device", post(remove_license_device))
        .with_state(state)
        .layer(middleware::from_fn(log_requests));

    let listener = TcpListener::bind(addr).await?;
    logger().info(
        "server.listening",
        json!({
            "address": addr.to_string()
        }),
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn healthz(State(state): State<AppState>) -> Response {
    let postgres_ok = state.ping_postgres().await.is_ok();
    let cache_ok = state.ping_cache().await.is_ok();
    let status = if postgres_ok { "ok" } else { "error" };
    let body = json!({
        "status": status,
        "timestamp": Utc::now().to_rfc3339(),
        "checks": {
            "postgres": if postgres_ok { "ok" } else { "error" },
            "cache": if cache_ok { "ok" } else { "degraded" },
        }
    });

    let code = if postgres_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

async fn list_stations(
    State(state): State<AppState>,
    Query(filter): Query<StationFilter>,
) -> ApiResponse {
    let stations = state.stations.list(&filter).await?;
    Ok(Json(stations).into_response())
}

async fn global_ads(State(state): State<AppState>) -> ApiResponse {
    let config = state.ads.global().await?;
    Ok(Json(config).into_response())
}

async fn screen_ads(State(state): State<AppState>, Path(screen): Path<String>) -> ApiResponse {
    let screen = screen.trim().to_string();
    if screen.is_empty() {
        return Err(ApiError::BadRequest("Screen name is required."));
    }
    let config = state.ads.for_screen(&screen).await?;
    Ok(Json(config).into_response())
}

async fn register_device(
    State(state): State<AppState>,
    Json(registration): Json<DeviceRegistration>,
) -> ApiResponse {
    if registration.device_id.trim().is_empty() {
        return Err(ApiError::BadRequest("Device identifier is required."));
    }
    let outcome = state.devices.register(&registration).await?;
    let message = match outcome {
        RegistrationOutcome::Registered => "Device registered successfully.",
        RegistrationOutcome::AlreadyRegistered => "Device already registered.",
    };
    Ok(Json(json!({ "message": message })).into_response())
}

async fn record_activity(
    State(state): State<AppState>,
    Json(entry): Json<ActivityEntry>,
) -> ApiResponse {
    state.devices.record_activity(&entry).await?;
    Ok(Json(json!({ "message": "Log stored successfully." })).into_response())
}

async fn app_config(State(state): State<AppState>) -> ApiResponse {
    let params = state.app_params.fetch_all().await?;
    Ok(Json(json!({ "status": "success", "config": params })).into_response())
}

async fn submit_complaint(
    State(state): State<AppState>,
    Json(complaint): Json<NewComplaint>,
) -> ApiResponse {
    if !EMAIL_REGEX.is_match(complaint.email.trim()) {
        return Err(ApiError::BadRequest("A valid email address is required."));
    }
    let reference_no = state.complaints.submit(&complaint).await?;
    Ok(Json(json!({
        "status": "success",
        "message": "Complaint submitted successfully",
        "reference_no": reference_no,
    }))
    .into_response())
}

async fn get_complaint(
    State(state): State<AppState>,
    Path(reference_no): Path<String>,
) -> ApiResponse {
    let complaint = state
        .complaints
        .find(reference_no.trim())
        .await?
        .ok_or(ApiError::NotFound("Complaint not found"))?;
    Ok(Json(complaint).into_response())
}

#[derive(Debug, Deserialize)]
struct EncryptedRequest {
    payload: String,
}

async fn generate_license(State(state): State<AppState>) -> ApiResponse {
    let issued = state.licenses.generate().await?;
    Ok(Json(json!({
        "status": "success",
        "plain_key_for_admin": issued.plain_key,
        "encrypted_license": issued.encrypted_license,
    }))
    .into_response())
}

async fn verify_license(
    State(state): State<AppState>,
    Json(request): Json<EncryptedRequest>,
) -> ApiResponse {
    state.licenses.verify(&request.payload).await?;
    Ok(Json(json!({ "status": "success", "is_premium": true })).into_response())
}

async fn list_license_devices(
    State(state): State<AppState>,
    Json(request): Json<EncryptedRequest>,
) -> ApiResponse {
    let devices = state.licenses.devices(&request.payload).await?;
    Ok(Json(json!({ "active_devices": devices })).into_response())
}

async fn remove_license_device(
    State(state): State<AppState>,
    Json(request): Json<EncryptedRequest>,
) -> ApiResponse {
    state.licenses.remove_device(&request.payload).await?;
    Ok(Json(json!({ "status": "success", "message": "Device removed" })).into_response())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    async fn response_json(response: Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn invalid_page_maps_to_bad_request() {
        rt().block_on(async {
            let (status, body) = response_json(ApiError::from(ListError::InvalidPage).into_response()).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "Page number must be 1 or greater.");
        });
    }

    #[test]
    fn store_unavailable_maps_to_service_unavailable() {
        rt().block_on(async {
            let error = StoreError::from(sqlx::Error::PoolTimedOut);
            let (status, body) = response_json(ApiError::from(error).into_response()).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(body["error"], "Database connection failed.");
        });
    }

    #[test]
    fn query_failures_map_to_internal_error() {
        rt().block_on(async {
            let error = StoreError::from(sqlx::Error::RowNotFound);
            let (status, body) = response_json(ApiError::from(error).into_response()).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body["error"], "Internal Server Error");
        });
    }

    #[test]
    fn missing_ads_config_maps_to_not_found() {
        rt().block_on(async {
            let (status, body) = response_json(ApiError::from(AdsError::NotFound).into_response()).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["error"], "Ads config not found.");
        });
    }

    #[test]
    fn license_errors_map_onto_the_original_status_codes() {
        rt().block_on(async {
            let (status, _) =
                response_json(ApiError::from(LicenseError::InvalidPayload).into_response()).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);

            let (status, _) =
                response_json(ApiError::from(LicenseError::NotFound).into_response()).await;
            assert_eq!(status, StatusCode::NOT_FOUND);

            let (status, body) =
                response_json(ApiError::from(LicenseError::DeviceLimit).into_response()).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(body["error"], "Device limit reached.");
        });
    }

    #[test]
    fn request_ids_are_preserved_or_generated() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("req-42"));
        assert_eq!(extract_request_id(&headers), "req-42");

        let generated = extract_request_id(&HeaderMap::new());
        assert!(Uuid::parse_str(&generated).is_ok());
    }

    #[test]
    fn email_validation_accepts_plain_addresses() {
        assert!(EMAIL_REGEX.is_match("listener@example.com"));
        assert!(EMAIL_REGEX.is_match("first.last+tag@radio.example.co"));
        assert!(!EMAIL_REGEX.is_match("not-an-email"));
        assert!(!EMAIL_REGEX.is_match("missing@tld"));
    }
}
