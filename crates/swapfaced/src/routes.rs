use crate::error::ApiError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use swapface_core::{HealthReport, HealthReporter, RequestOrchestrator, SwapRequest, Upload};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub orchestrator: Arc<RequestOrchestrator>,
    pub health: HealthReporter,
}

#[derive(Serialize)]
struct ProcessResponse {
    success: bool,
    image: String,
}

pub fn build_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/process", post(process))
        // The body ceiling is enforced once, by RequestBodyLimitLayer.
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(middleware::map_response(json_payload_too_large))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.health.health())
}

/// The body limit layer answers 413 in plain text; errors leave as JSON.
async fn json_payload_too_large(response: Response) -> Response {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .is_some_and(|v| v.as_bytes().starts_with(b"application/json"));
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE && !is_json {
        return ApiError::PayloadTooLarge("request body exceeds the upload limit".into())
            .into_response();
    }
    response
}

async fn process(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::BadUpload(e.body_text()))?;
    let mut request = SwapRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(ApiError::from_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        // Parts that are not files do not count as uploads.
        let Some(filename) = field.file_name().map(str::to_owned) else {
            continue;
        };
        if name != "source" && name != "target" {
            continue;
        }
        let bytes = field.bytes().await.map_err(ApiError::from_multipart)?;
        let upload = Upload { filename, bytes: bytes.to_vec() };
        if name == "source" {
            request.source = Some(upload);
        } else {
            request.target = Some(upload);
        }
    }

    let orchestrator = state.orchestrator.clone();
    let output = tokio::task::spawn_blocking(move || orchestrator.process(request))
        .await
        .map_err(|e| ApiError::Internal(format!("swap worker failed: {e}")))??;

    Ok(Json(ProcessResponse {
        success: true,
        image: output.data_url(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use swapface_core::alignment::reference_landmarks;
    use swapface_core::codec::{self, OutputFormat};
    use swapface_core::detector::DetectorError;
    use swapface_core::recognizer::RecognizerError;
    use swapface_core::swapper::SwapperError;
    use swapface_core::{
        BoundingBox, ChannelOrder, Embedding, FaceAnalysis, Image, Landmarks, ModelRegistry, Models,
        SelectionPolicy, SwapModel,
    };
    use tower::ServiceExt;

    const BOUNDARY: &str = "swapface-test-boundary";

    /// One centered face in every image that is not black at the origin.
    struct CenteredFace;

    impl FaceAnalysis for CenteredFace {
        fn detect(&mut self, image: &Image) -> Result<Vec<BoundingBox>, DetectorError> {
            if image.rgb_at(0, 0) == [0, 0, 0] {
                return Ok(vec![]);
            }
            let size = image.width().min(image.height()) as f32 / 2.0;
            let (x, y) = (size / 2.0, size / 2.0);
            let scale = size / 112.0;
            let landmarks = reference_landmarks(112).map(|(lx, ly)| (x + lx * scale, y + ly * scale));
            Ok(vec![BoundingBox {
                x,
                y,
                width: size,
                height: size,
                confidence: 0.9,
                landmarks: Some(landmarks),
            }])
        }

        fn embed(&mut self, _image: &Image, _landmarks: &Landmarks) -> Result<Embedding, RecognizerError> {
            Ok(Embedding { values: vec![0.0442; 512] })
        }
    }

    struct SolidSwap;

    impl SwapModel for SolidSwap {
        fn crop_size(&self) -> u32 {
            128
        }

        fn swap_crop(&mut self, crop: &Image, _source: &Embedding) -> Result<Image, SwapperError> {
            Image::filled(crop.width(), crop.height(), ChannelOrder::Rgb, [200, 30, 30])
                .map_err(|e| SwapperError::InferenceFailed(e.to_string()))
        }
    }

    fn app(registry: ModelRegistry, max_upload_bytes: usize) -> Router {
        let registry = Arc::new(registry);
        let orchestrator = Arc::new(RequestOrchestrator::new(
            registry.clone(),
            SelectionPolicy::default(),
            OutputFormat::default(),
        ));
        let state = Arc::new(AppState {
            orchestrator,
            health: HealthReporter::new(registry),
        });
        build_router(state, max_upload_bytes)
    }

    fn ready() -> ModelRegistry {
        let registry = ModelRegistry::new();
        registry.initialize(|| {
            Ok(Models {
                analysis: Box::new(CenteredFace),
                swapper: Box::new(SolidSwap),
            })
        });
        registry
    }

    fn png(rgb: [u8; 3]) -> Vec<u8> {
        let image = Image::filled(96, 80, ChannelOrder::Rgb, rgb).unwrap();
        codec::encode(&image, OutputFormat::Png).unwrap()
    }

    fn multipart_body(parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, data) in parts {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn process_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/process")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_while_loading() {
        let response = app(ModelRegistry::new(), 1 << 20)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "loading");
        assert_eq!(json["models_loaded"], false);
    }

    #[tokio::test]
    async fn test_health_when_ready() {
        let response = app(ready(), 1 << 20)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = json_body(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["models_loaded"], true);
    }

    #[tokio::test]
    async fn test_process_success() {
        let source = png([180, 150, 120]);
        let target = png([170, 140, 110]);
        let body = multipart_body(&[("source", "a.png", &source), ("target", "b.png", &target)]);
        let response = app(ready(), 1 << 20).oneshot(process_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["success"], true);
        assert!(json["image"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_process_missing_part() {
        let source = png([180, 150, 120]);
        let body = multipart_body(&[("source", "a.png", &source)]);
        let response = app(ready(), 1 << 20).oneshot(process_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_process_undecodable_image() {
        let source = png([180, 150, 120]);
        let body = multipart_body(&[("source", "a.png", &source), ("target", "b.png", b"garbage")]);
        let response = app(ready(), 1 << 20).oneshot(process_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert!(json["error"].as_str().unwrap().contains("target"));
    }

    #[tokio::test]
    async fn test_process_while_loading() {
        let source = png([180, 150, 120]);
        let body = multipart_body(&[("source", "a.png", &source), ("target", "b.png", &source)]);
        let response = app(ModelRegistry::new(), 1 << 20)
            .oneshot(process_request(body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_process_no_face_in_target() {
        let source = png([180, 150, 120]);
        let target = png([0, 0, 0]);
        let body = multipart_body(&[("source", "a.png", &source), ("target", "b.png", &target)]);
        let response = app(ready(), 1 << 20).oneshot(process_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_body(response).await;
        assert!(json["error"].as_str().unwrap().contains("target"));
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let big = vec![7u8; 4096];
        let body = multipart_body(&[("source", "a.png", &big), ("target", "b.png", &big)]);
        let response = app(ready(), 1024).oneshot(process_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_process_rejects_non_multipart_body_as_json() {
        let requests = [
            Request::post("/process").body(Body::empty()).unwrap(),
            Request::post("/process")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        ];
        for request in requests {
            let response = app(ready(), 1 << 20).oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(
                response.headers().get(header::CONTENT_TYPE).unwrap(),
                "application/json"
            );
            assert!(json_body(response).await["error"].is_string());
        }
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let request = Request::get("/health")
            .header(header::ORIGIN, "http://example.com")
            .body(Body::empty())
            .unwrap();
        let response = app(ModelRegistry::new(), 1 << 20).oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }
}
