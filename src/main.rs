mod gateway;
mod http;
mod metrics;
mod models;
mod studio;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
};
use gateway::{GeminiClient, GeminiConfig, ImagePayload};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    AddPhotosRequest, AddPhotosResponse, ApiError, BackgroundsResponse, CreateBackgroundRequest,
    ImageQuery, ImageVariant, SelectBackgroundRequest,
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use studio::{
    EnhanceReport, Studio, StudioError, StudioErrorKind, StudioSnapshot,
    backgrounds::{BackgroundId, BackgroundSummary},
    form::{DetailsPatch, ProductDetails},
    photos::PhotoId,
    view::ProductPage,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "studio.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let gateway = GeminiClient::new(GeminiConfig::from_env());
    if !gateway.has_credential() {
        warn!(
            target = "studio.api",
            "GEMINI_API_KEY is not set; inference calls will fail"
        );
    }
    let (studio, _seeding) = Studio::start(Arc::new(gateway));
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let app = router(AppState {
        studio,
        prometheus_handle,
        metrics_key: std::env::var("METRICS_KEY").ok().filter(|key| !key.is_empty()),
    });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "studio.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    studio: Studio,
    prometheus_handle: PrometheusHandle,
    metrics_key: Option<String>,
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/studio", get(get_studio))
        .route("/photos", post(add_photos))
        .route("/photos/enhance", post(enhance_photos))
        .route("/photos/{id}", delete(remove_photo))
        .route("/photos/{id}/image", get(photo_image))
        .route("/details", patch(update_details))
        .route("/details/autofill", post(auto_fill_details))
        .route("/backgrounds", get(list_backgrounds).post(create_background))
        .route("/backgrounds/selected", put(select_background))
        .route("/backgrounds/{id}", delete(delete_background))
        .route("/backgrounds/{id}/image", get(background_image))
        .route(
            "/listing",
            get(product_page)
                .post(create_listing)
                .delete(delete_listing),
        )
        .route("/listing/back", post(back_to_editing))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
///
/// `default_ready` turns true once the default background has been seeded.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "listing-studio-rs",
        "default_ready": state.studio.is_default_ready(),
    }))
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(32 * 1024 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = state.metrics_key.as_deref() {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Full read model of the listing being edited.
async fn get_studio(State(state): State<AppState>) -> Json<StudioSnapshot> {
    crate::metrics::inc_requests("/studio");
    Json(state.studio.snapshot().await)
}

/// Upload a batch of photos.
///
/// - Method: `POST`
/// - Path: `/photos`
/// - Body: `{"photos": [{"data": "<base64 or data URL>", "mime_type": "image/jpeg"}]}`
///
/// Inputs beyond the five-photo cap are dropped; one unreadable input rejects
/// the whole batch.
async fn add_photos(
    State(state): State<AppState>,
    Json(payload): Json<AddPhotosRequest>,
) -> Result<Json<AddPhotosResponse>, AppError> {
    crate::metrics::inc_requests("/photos");
    let added = state.studio.add_photos(&payload.photos).await?;
    Ok(Json(AddPhotosResponse {
        added,
        studio: state.studio.snapshot().await,
    }))
}

async fn remove_photo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StudioSnapshot>, AppError> {
    let id = parse_photo_id("remove_photo", &id)?;
    state.studio.remove_photo(id).await?;
    Ok(Json(state.studio.snapshot().await))
}

async fn photo_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, AppError> {
    let id = parse_photo_id("photo_image", &id)?;
    let enhanced = match query.variant {
        ImageVariant::Display => None,
        ImageVariant::Original => Some(false),
        ImageVariant::Enhanced => Some(true),
    };
    let image = state
        .studio
        .photo_image(id, enhanced)
        .await
        .ok_or_else(|| StudioError::not_found("photo_image", "no such photo image"))?;
    Ok(image_response(image))
}

/// Composite every photo that lacks an enhanced image onto the selected background.
///
/// - Method: `POST`
/// - Path: `/photos/enhance`
/// - Response: `EnhanceReport`; a partial failure answers 502 and keeps the
///   photos that did succeed.
async fn enhance_photos(State(state): State<AppState>) -> Result<Json<EnhanceReport>, AppError> {
    crate::metrics::inc_requests("/photos/enhance");
    let report = state.studio.enhance_all_photos().await?;
    Ok(Json(report))
}

async fn update_details(
    State(state): State<AppState>,
    Json(patch): Json<DetailsPatch>,
) -> Result<Json<ProductDetails>, AppError> {
    let details = state.studio.update_details(patch).await?;
    Ok(Json(details))
}

/// Fill title, description and price from the first photo.
///
/// - Method: `POST`
/// - Path: `/details/autofill`
/// - Response: the replaced `ProductDetails`
async fn auto_fill_details(
    State(state): State<AppState>,
) -> Result<Json<ProductDetails>, AppError> {
    crate::metrics::inc_requests("/details/autofill");
    let details = state.studio.auto_fill_details().await?;
    Ok(Json(details))
}

async fn list_backgrounds(State(state): State<AppState>) -> Json<BackgroundsResponse> {
    Json(backgrounds_response(&state.studio).await)
}

/// Generate a custom background from a prompt and select it.
///
/// - Method: `POST`
/// - Path: `/backgrounds`
/// - Body: `{"prompt": "Minimalist black background and studio lights in the middle"}`
async fn create_background(
    State(state): State<AppState>,
    Json(payload): Json<CreateBackgroundRequest>,
) -> Result<Json<BackgroundSummary>, AppError> {
    crate::metrics::inc_requests("/backgrounds");
    let created = state.studio.create_background(&payload.prompt).await?;
    Ok(Json(created))
}

async fn select_background(
    State(state): State<AppState>,
    Json(payload): Json<SelectBackgroundRequest>,
) -> Result<Json<BackgroundsResponse>, AppError> {
    let id = parse_background_id("select_background", &payload.id)?;
    state.studio.select_background(id).await?;
    Ok(Json(backgrounds_response(&state.studio).await))
}

async fn delete_background(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BackgroundsResponse>, AppError> {
    let id = parse_background_id("delete_background", &id)?;
    state.studio.delete_background(id).await?;
    Ok(Json(backgrounds_response(&state.studio).await))
}

async fn background_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_background_id("background_image", &id)?;
    let image = state
        .studio
        .background_image(id)
        .await
        .ok_or_else(|| StudioError::not_found("background_image", "no such background"))?;
    Ok(image_response(image))
}

/// Switch to the product view. Answers with the snapshot; `view` stays
/// `editing` while the form is incomplete.
async fn create_listing(State(state): State<AppState>) -> Json<StudioSnapshot> {
    crate::metrics::inc_requests("/listing");
    state.studio.create_listing().await;
    Json(state.studio.snapshot().await)
}

async fn back_to_editing(State(state): State<AppState>) -> Json<StudioSnapshot> {
    state.studio.back_to_editing().await;
    Json(state.studio.snapshot().await)
}

async fn delete_listing(State(state): State<AppState>) -> Json<StudioSnapshot> {
    state.studio.delete_listing().await;
    Json(state.studio.snapshot().await)
}

async fn product_page(State(state): State<AppState>) -> Result<Json<ProductPage>, AppError> {
    let page = state
        .studio
        .product_page()
        .await
        .ok_or_else(|| StudioError::not_found("product_page", "listing is not published"))?;
    Ok(Json(page))
}

async fn backgrounds_response(studio: &Studio) -> BackgroundsResponse {
    let (backgrounds, selected) = studio.backgrounds().await;
    BackgroundsResponse {
        backgrounds,
        selected,
        generating: studio.is_generating_background(),
        default_ready: studio.is_default_ready(),
    }
}

fn image_response(image: ImagePayload) -> Response {
    ([(header::CONTENT_TYPE, image.mime_type)], image.bytes).into_response()
}

fn parse_photo_id(action: &'static str, raw: &str) -> Result<PhotoId, StudioError> {
    raw.parse()
        .map_err(|_| StudioError::not_found(action, format!("unknown photo `{raw}`")))
}

fn parse_background_id(action: &'static str, raw: &str) -> Result<BackgroundId, StudioError> {
    raw.parse()
        .map_err(|err: studio::backgrounds::BackgroundIdError| {
            StudioError::invalid_input(action, err.to_string())
        })
}

#[derive(Debug)]
enum AppError {
    Studio(StudioError),
}

impl From<StudioError> for AppError {
    fn from(value: StudioError) -> Self {
        Self::Studio(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Studio(err) => {
                let status = match err.kind() {
                    StudioErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    StudioErrorKind::NotFound => StatusCode::NOT_FOUND,
                    StudioErrorKind::Busy | StudioErrorKind::Published => StatusCode::CONFLICT,
                    StudioErrorKind::Remote => StatusCode::BAD_GATEWAY,
                };
                let payload = ApiError {
                    error: err.action().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::ScriptedGateway;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_app(gateway: ScriptedGateway) -> (Router, Studio) {
        app_with_metrics_key(gateway, None)
    }

    fn app_with_metrics_key(gateway: ScriptedGateway, key: Option<&str>) -> (Router, Studio) {
        let studio = Studio::new(Arc::new(gateway));
        let prometheus_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = router(AppState {
            studio: studio.clone(),
            prometheus_handle,
            metrics_key: key.map(str::to_string),
        });
        (app, studio)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, bytes.to_vec())
    }

    fn json_of(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).expect("json body")
    }

    fn photo_body(items: &[&[u8]]) -> Value {
        let photos: Vec<Value> = items
            .iter()
            .map(|bytes| json!({ "data": BASE64.encode(bytes), "mime_type": "image/jpeg" }))
            .collect();
        json!({ "photos": photos })
    }

    #[tokio::test]
    async fn health_reports_seeding_state() {
        let (app, studio) = test_app(ScriptedGateway::new());
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["default_ready"], json!(false));

        studio.seed_default_background().await;
        let (_, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(json_of(&body)["default_ready"], json!(true));
    }

    #[tokio::test]
    async fn full_listing_flow_over_http() {
        let (app, studio) = test_app(ScriptedGateway::new().with_listing_text(
            "```json\n{\"title\":\"Bowl\",\"description\":\"Nice bowl\",\"price\":\"25\"}\n```",
        ));
        studio.seed_default_background().await;

        let (status, body) =
            call(&app, Method::POST, "/photos", Some(photo_body(&[b"a", b"b"]))).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_of(&body);
        assert_eq!(body["added"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["studio"]["photo_count"], json!(2));
        assert_eq!(body["studio"]["is_form_complete"], json!(false));

        let (status, body) = call(&app, Method::POST, "/details/autofill", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["title"], json!("Bowl"));

        let (status, body) = call(&app, Method::POST, "/photos/enhance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["enhanced_count"], json!(2));

        let (status, body) = call(&app, Method::POST, "/listing", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["view"], json!("viewing"));

        let (status, body) = call(&app, Method::GET, "/listing", None).await;
        assert_eq!(status, StatusCode::OK);
        let page = json_of(&body);
        assert_eq!(page["price"], json!("25"));
        assert_eq!(page["photos"].as_array().map(Vec::len), Some(2));

        let (status, body) = call(&app, Method::DELETE, "/listing", None).await;
        assert_eq!(status, StatusCode::OK);
        let snapshot = json_of(&body);
        assert_eq!(snapshot["photo_count"], json!(0));
        assert_eq!(snapshot["view"], json!("editing"));
        assert_eq!(snapshot["details"]["title"], json!(""));

        let (status, _) = call(&app, Method::GET, "/listing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn incomplete_listing_stays_in_editing() {
        let (app, _studio) = test_app(ScriptedGateway::new());
        let (status, _) = call(&app, Method::POST, "/photos", Some(photo_body(&[b"a"]))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, Method::POST, "/listing", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["view"], json!("editing"));
    }

    #[tokio::test]
    async fn error_kinds_map_to_status_codes() {
        let (app, _studio) = test_app(ScriptedGateway::new().failing_generation());

        let (status, body) = call(
            &app,
            Method::POST,
            "/backgrounds",
            Some(json!({ "prompt": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_of(&body)["error"], json!("create_background"));

        let (status, _) = call(
            &app,
            Method::POST,
            "/backgrounds",
            Some(json!({ "prompt": "gold" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, _) = call(&app, Method::DELETE, "/photos/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            Method::POST,
            "/photos",
            Some(json!({ "photos": [{ "data": "AQID", "mime_type": "text/plain" }] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn background_selection_and_images() {
        let (app, _studio) = test_app(ScriptedGateway::new());

        let (status, body) = call(
            &app,
            Method::POST,
            "/backgrounds",
            Some(json!({ "prompt": "black velvet" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let created = json_of(&body);
        let id = created["id"].as_str().expect("id").to_string();
        assert_eq!(created["selected"], json!(true));

        let (status, bytes) =
            call(&app, Method::GET, &format!("/backgrounds/{id}/image"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"bg:black velvet".to_vec());

        let (status, body) = call(
            &app,
            Method::PUT,
            "/backgrounds/selected",
            Some(json!({ "id": "default" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["selected"]["id"], json!("default"));

        let (status, body) =
            call(&app, Method::DELETE, &format!("/backgrounds/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["backgrounds"].as_array().map(Vec::len), Some(1));

        let (status, _) = call(&app, Method::GET, "/backgrounds/default/image", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn photo_image_serves_bytes_with_mime() {
        let (app, _studio) = test_app(ScriptedGateway::new());
        let (_, body) = call(&app, Method::POST, "/photos", Some(photo_body(&[b"raw"]))).await;
        let id = json_of(&body)["added"][0].as_str().expect("id").to_string();

        let (status, bytes) = call(&app, Method::GET, &format!("/photos/{id}/image"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"raw".to_vec());

        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/photos/{id}/image?variant=enhanced"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    async fn get_metrics(app: &Router, key: Option<&str>) -> (StatusCode, Option<String>, String) {
        let mut builder = Request::builder().method(Method::GET).uri("/metrics");
        if let Some(key) = key {
            builder = builder.header("X-Metrics-Key", key);
        }
        let response = app
            .clone()
            .oneshot(builder.body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, content_type, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_prometheus_text() {
        let (app, _studio) = test_app(ScriptedGateway::new());
        let (status, content_type, body) = get_metrics(&app, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/plain; version=0.0.4"));
        assert!(!body.contains("unauthorized"));
    }

    #[tokio::test]
    async fn metrics_endpoint_checks_the_key() {
        let (app, _studio) = app_with_metrics_key(ScriptedGateway::new(), Some("s3cret"));

        let (status, _, body) = get_metrics(&app, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "unauthorized");

        let (status, _, _) = get_metrics(&app, Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, content_type, _) = get_metrics(&app, Some("s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/plain; version=0.0.4"));
    }

    #[tokio::test]
    async fn published_listing_rejects_edits_with_conflict() {
        let (app, studio) = test_app(ScriptedGateway::new());
        studio.seed_default_background().await;
        let (_, body) = call(&app, Method::POST, "/photos", Some(photo_body(&[b"a"]))).await;
        let id = json_of(&body)["added"][0].as_str().expect("id").to_string();
        call(
            &app,
            Method::PATCH,
            "/details",
            Some(json!({ "title": "Bowl", "description": "Nice bowl", "price": "25" })),
        )
        .await;
        call(&app, Method::POST, "/photos/enhance", None).await;
        let (_, body) = call(&app, Method::POST, "/listing", None).await;
        assert_eq!(json_of(&body)["view"], json!("viewing"));

        let (status, _) = call(&app, Method::DELETE, &format!("/photos/{id}"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = call(
            &app,
            Method::PATCH,
            "/details",
            Some(json!({ "title": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(&app, Method::GET, "/listing", None).await;
        assert_eq!(status, StatusCode::OK);
        let page = json_of(&body);
        assert_eq!(page["title"], json!("Bowl"));
        assert_eq!(page["photos"].as_array().map(Vec::len), Some(1));

        let (_, body) = call(&app, Method::POST, "/listing/back", None).await;
        assert_eq!(json_of(&body)["view"], json!("editing"));
        let (status, _) = call(&app, Method::DELETE, &format!("/photos/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
