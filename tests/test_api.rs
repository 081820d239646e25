use std::{
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use aicrop::{
    core::vision::{VisionClient, VisionRequest, VisionResponse},
    create_router, AppState, Config, VisionError,
};

const BOUNDARY: &str = "aicrop-test-boundary";
const AESTHETIC_ANSWER: &str = r#"{"analysis":{"title":"Centered subject","effect":"Tighter framing"},"crop_params":{"x":10,"y":10,"width":150,"height":120}}"#;
const SCENE_ANSWER: &str = r#"Here you go:
```json
{"reason":"Keeps the subject centered","details":"Square crop on the left","crop_params":{"x":0,"y":0,"width":200,"height":200}}
```"#;

/// Answers aesthetic requests and scene requests (the ones carrying user
/// text) with fixed JSON, or fails every call.
struct MockVision {
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockVision {
    fn answering() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionClient for MockVision {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-vision-1"
    }

    async fn complete(&self, request: &VisionRequest) -> Result<VisionResponse, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(VisionError::Http {
                status: 503,
                message: "upstream unavailable".to_string(),
            });
        }
        let text = if request.user_text.is_some() {
            SCENE_ANSWER
        } else {
            AESTHETIC_ANSWER
        };
        Ok(VisionResponse {
            text: text.to_string(),
            model: "mock-vision-1".to_string(),
            latency_ms: 1,
        })
    }
}

struct TestApp {
    router: Router,
    vision: Arc<MockVision>,
    output: TempDir,
}

fn test_app_with(vision: Arc<MockVision>, tweak: impl FnOnce(&mut Config)) -> TestApp {
    let output = tempfile::tempdir().unwrap();
    let mut config = Config {
        openai_api_key: "sk-test".to_string(),
        output_dir: output.path().to_path_buf(),
        prompts_dir: output.path().join("no-prompts"),
        retry_base_delay_ms: 0,
        enable_logging: false,
        ..Config::default()
    };
    tweak(&mut config);
    let client: Arc<dyn VisionClient> = vision.clone();
    let state = AppState::with_vision_client(config, client);
    TestApp {
        router: create_router(state),
        vision,
        output,
    }
}

fn test_app() -> TestApp {
    test_app_with(MockVision::answering(), |_| {})
}

fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb([shade, 90, 160]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

enum Part<'a> {
    File {
        field: &'a str,
        name: &'a str,
        mime: &'a str,
        data: &'a [u8],
    },
    Text {
        field: &'a str,
        value: &'a str,
    },
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File {
                field,
                name,
                mime,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        field, name, mime
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text { field, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}", field, value)
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn post_form(uri: &str, ip: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header("x-forwarded-for", ip)
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

fn get(uri: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", ip)
        .body(Body::empty())
        .unwrap()
}

fn image_part<'a>(data: &'a [u8]) -> Part<'a> {
    Part::File {
        field: "image",
        name: "photo.png",
        mime: "image/png",
        data,
    }
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_is_not_rate_limited() {
    let app = test_app_with(MockVision::answering(), |c| c.rate_limit_max = 1);

    for _ in 0..3 {
        let response = send(&app.router, get("/api/health", "10.0.0.1")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["version"].is_string());
    }
}

#[tokio::test]
async fn test_global_rate_limit() {
    let app = test_app_with(MockVision::answering(), |c| c.rate_limit_max = 2);

    for _ in 0..2 {
        let response = send(&app.router, get("/api/platforms", "10.0.0.2")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = send(&app.router, get("/api/platforms", "10.0.0.2")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    let body = json_body(response).await;
    assert_eq!(body["error"], "RATE_LIMIT");
    assert_eq!(body["message"], "Maximum 2 requests per 15 minutes");

    // another client is unaffected
    let other = send(&app.router, get("/api/platforms", "10.0.0.3")).await;
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let app = test_app();
    let response = send(&app.router, get("/api/nope", "10.0.0.4")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "NOT_FOUND");
}

#[tokio::test]
async fn test_aesthetic_crop_download_and_history() {
    let app = test_app();
    let image = png(300, 200, 10);

    let response = send(
        &app.router,
        post_form(
            "/api/crop/aesthetic",
            "10.0.1.1",
            &[image_part(&image), Part::Text { field: "language", value: "en" }],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["analysis"]["title"], "Centered subject");
    assert_eq!(body["crop_params"]["width"], 150);
    assert_eq!(body["validation_info"]["fallback_used"], false);
    assert_eq!(body["metadata"]["cropped"]["width"], 150);

    let filename = body["output"]["filename"].as_str().unwrap().to_string();
    assert!(filename.starts_with("aesthetic_"));
    assert!(filename.ends_with(".png"));
    assert!(app.output.path().join(&filename).exists());

    let download = send(
        &app.router,
        get(body["output"]["download_url"].as_str().unwrap(), "10.0.1.1"),
    )
    .await;
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(download.headers()[header::CONTENT_TYPE], "image/png");
    assert!(download.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .starts_with("attachment"));
    let bytes = to_bytes(download.into_body(), usize::MAX).await.unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);

    let history = json_body(send(&app.router, get("/api/history", "10.0.1.1")).await).await;
    assert_eq!(history["history"][0]["filename"], filename.as_str());
}

#[tokio::test]
async fn test_download_missing_file() {
    let app = test_app();
    let response = send(&app.router, get("/api/download/missing.png", "10.0.1.2")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_aesthetic_falls_back_when_model_fails() {
    let app = test_app_with(MockVision::failing(), |_| {});
    let image = png(400, 300, 20);

    let response = send(
        &app.router,
        post_form("/api/crop/aesthetic", "10.0.1.3", &[image_part(&image)]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["validation_info"]["fallback_used"], true);
    // 503 is retryable, so both attempts were made
    assert_eq!(app.vision.calls(), 2);
}

#[tokio::test]
async fn test_rejects_disallowed_type() {
    let app = test_app();
    let response = send(
        &app.router,
        post_form(
            "/api/crop/aesthetic",
            "10.0.1.4",
            &[Part::File {
                field: "image",
                name: "notes.txt",
                mime: "text/plain",
                data: b"hello",
            }],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "BAD_IMAGE_FORMAT");
    assert_eq!(app.vision.calls(), 0);
}

#[tokio::test]
async fn test_batch_reports_each_file() {
    let app = test_app();
    let good = png(300, 200, 30);
    let response = send(
        &app.router,
        post_form(
            "/api/crop/batch-aesthetic",
            "10.0.1.5",
            &[
                Part::File {
                    field: "images",
                    name: "a.png",
                    mime: "image/png",
                    data: &good,
                },
                Part::File {
                    field: "images",
                    name: "b.png",
                    mime: "image/png",
                    data: b"not really a png",
                },
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["success_count"], 1);
    assert_eq!(body["results"][0]["success"], true);
    assert_eq!(body["results"][1]["success"], false);
    assert_eq!(body["results"][1]["original_filename"], "b.png");

    let batch_id = body["batch_id"].as_str().unwrap();
    assert_eq!(
        body["results"][0]["request_id"],
        format!("{}_1", batch_id).as_str()
    );
}

#[tokio::test]
async fn test_public_crop_replays_duplicates_without_quota() {
    let app = test_app();
    let image = png(300, 200, 40);

    let first = json_body(
        send(
            &app.router,
            post_form("/api/crop", "10.0.2.1", &[image_part(&image)]),
        )
        .await,
    )
    .await;
    assert_eq!(first["cached"], false);
    assert_eq!(first["dailyUsage"]["used"], 1);
    assert_eq!(first["originalFormat"]["extension"], "png");
    assert_eq!(first["metadata"]["file"]["type"], "image/png");
    assert!(first["formatAwareCacheKey"]
        .as_str()
        .unwrap()
        .ends_with(":png:image/png"));

    let second = json_body(
        send(
            &app.router,
            post_form("/api/crop", "10.0.2.1", &[image_part(&image)]),
        )
        .await,
    )
    .await;
    assert_eq!(second["cached"], true);
    assert_eq!(second["dailyUsage"]["used"], 1);
    assert_eq!(second["imageHash"], first["imageHash"]);
    assert_eq!(app.vision.calls(), 1);
}

#[tokio::test]
async fn test_public_crop_daily_quota() {
    let app = test_app_with(MockVision::answering(), |c| c.daily_usage_limit = 1);

    let first = send(
        &app.router,
        post_form("/api/crop", "10.0.2.2", &[image_part(&png(300, 200, 50))]),
    )
    .await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = send(
        &app.router,
        post_form("/api/crop", "10.0.2.2", &[image_part(&png(300, 200, 60))]),
    )
    .await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(second).await;
    assert_eq!(body["error"], "QUOTA_EXCEEDED");
    assert_eq!(body["dailyUsage"]["limit"], 1);

    let status = json_body(send(&app.router, get("/api/usage-status", "10.0.2.2")).await).await;
    assert_eq!(status["data"]["allowed"], false);
    assert_eq!(status["data"]["remaining"], 0);
    assert_eq!(status["data"]["warningThreshold"], 3);
}

#[tokio::test]
async fn test_public_crop_times_out() {
    let app = test_app_with(MockVision::slow(Duration::from_secs(5)), |c| {
        c.crop_timeout = Duration::from_millis(50)
    });

    let response = send(
        &app.router,
        post_form("/api/crop", "10.0.2.5", &[image_part(&png(300, 200, 80))]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json_body(response).await["error"], "AI_TIMEOUT");
}

#[tokio::test]
async fn test_public_crop_rejects_oversized_upload() {
    let app = test_app_with(MockVision::answering(), |c| c.max_image_size = 1024);
    let oversized = vec![0u8; 4096];

    let response = send(
        &app.router,
        post_form(
            "/api/crop",
            "10.0.2.6",
            &[Part::File {
                field: "image",
                name: "huge.png",
                mime: "image/png",
                data: &oversized,
            }],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(response).await["error"], "PAYLOAD_TOO_LARGE");
    assert_eq!(app.vision.calls(), 0);

    // the rejected upload did not consume quota
    let status = json_body(send(&app.router, get("/api/usage-status", "10.0.2.6")).await).await;
    assert_eq!(status["data"]["used"], 0);
}

#[tokio::test]
async fn test_public_crop_rejects_foreign_origin() {
    let app = test_app();
    let mut request = post_form("/api/crop", "10.0.2.3", &[image_part(&png(300, 200, 70))]);
    request
        .headers_mut()
        .insert(header::ORIGIN, "https://evil.example".parse().unwrap());

    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "FORBIDDEN");
    assert_eq!(app.vision.calls(), 0);
}

#[tokio::test]
async fn test_contract_model_then_cache() {
    let app = test_app();
    let image = png(300, 200, 80);
    let parts = || {
        vec![
            image_part(&image),
            Part::Text {
                field: "scene",
                value: "instagram-post",
            },
        ]
    };

    let response = send(
        &app.router,
        post_form("/api/crop/analyze", "10.0.3.1", &parts()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-crop-api-version"], "1");
    assert_eq!(response.headers()["x-prompt-version"], "v1.0");
    let body = json_body(response).await;
    assert_eq!(body["version"], "1");
    assert_eq!(body["metadata"]["source"], "model");
    assert_eq!(body["metadata"]["model"], "mock-vision-1");
    assert_eq!(body["crop_params"]["crop_ratio"], "1:1");
    assert_eq!(body["crop_params"]["original_size"][0], 300);
    assert_eq!(body["crop_params"]["output_size"][0], 200);

    let replay = json_body(
        send(
            &app.router,
            post_form("/api/crop/analyze", "10.0.3.1", &parts()),
        )
        .await,
    )
    .await;
    assert_eq!(replay["metadata"]["source"], "cache");
    assert_ne!(replay["metadata"]["request_id"], body["metadata"]["request_id"]);
    assert_eq!(app.vision.calls(), 1);
}

#[tokio::test]
async fn test_contract_fallback_keeps_scene() {
    let app = test_app_with(MockVision::failing(), |_| {});
    let image = png(400, 200, 90);

    let response = send(
        &app.router,
        post_form(
            "/api/crop/analyze",
            "10.0.3.2",
            &[
                image_part(&image),
                Part::Text {
                    field: "scene",
                    value: "tiktok",
                },
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["metadata"]["source"], "fallback");
    assert_eq!(body["metadata"]["scene"], "tiktok");
    assert_eq!(body["crop_params"]["crop_ratio"], "9:16");
    // tallest 9:16 box in a 400x200 image, centered
    assert_eq!(body["crop_params"]["crop_box"]["height"], 200);
    assert_eq!(body["crop_params"]["crop_box"]["width"], 112);
    assert_eq!(body["crop_params"]["crop_box"]["x"], 144);
}

#[tokio::test]
async fn test_contract_errors_use_envelope() {
    let app = test_app();

    let missing = send(
        &app.router,
        post_form(
            "/api/crop/analyze",
            "10.0.3.3",
            &[Part::Text {
                field: "scene",
                value: "tiktok",
            }],
        ),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(missing.headers()["x-crop-api-version"], "1");
    let body = json_body(missing).await;
    assert_eq!(body["error"]["code"], "BAD_IMAGE_FORMAT");
    assert!(body["request_id"].is_string());

    let image = png(300, 200, 100);
    let bad_ratio = send(
        &app.router,
        post_form(
            "/api/crop/analyze",
            "10.0.3.3",
            &[
                image_part(&image),
                Part::Text {
                    field: "ratio",
                    value: "wide",
                },
            ],
        ),
    )
    .await;
    assert_eq!(bad_ratio.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(bad_ratio).await["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_analyze_debug_requires_model_and_prompt() {
    let app = test_app();
    let image = png(300, 200, 110);
    let response = send(
        &app.router,
        post_form(
            "/api/analyze-debug",
            "10.0.4.1",
            &[
                image_part(&image),
                Part::Text {
                    field: "model",
                    value: "gpt-4o",
                },
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_analyze_debug_returns_model_answer() {
    let app = test_app();
    let image = png(300, 200, 120);
    let response = send(
        &app.router,
        post_form(
            "/api/analyze-debug",
            "10.0.4.2",
            &[
                image_part(&image),
                Part::Text {
                    field: "model",
                    value: "gpt-4o",
                },
                Part::Text {
                    field: "prompt",
                    value: "Crop a ${originalWidth}x${originalHeight} image",
                },
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["crop_params"]["x"], 10);
    assert_eq!(body["metadata"]["originalWidth"], 300);
    assert_eq!(body["metadata"]["promptLength"], "Crop a 300x200 image".len());
}

#[tokio::test]
async fn test_platforms_listing() {
    let app = test_app();
    let body = json_body(send(&app.router, get("/api/platforms", "10.0.5.1")).await).await;
    assert_eq!(body["default"], "instagram-post");
    let platforms = body["platforms"].as_array().unwrap();
    assert!(platforms
        .iter()
        .any(|p| p["id"] == "xiaohongshu" && p["ratio"] == "3:4"));
}
