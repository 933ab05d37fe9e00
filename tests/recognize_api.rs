//! End-to-end tests for `POST /` against a stub face engine and a local image host.
//!
//! The stub treats an image as a row of 8px-wide strips: every non-black strip is a
//! "face" whose descriptor is its colour scaled to [0, 1].

use anyhow::Result;
use axum::{
    body::Body,
    extract::{Path as UrlPath, State},
    http::{header, Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use facematch::{
    engine::FaceEngine,
    loader::ImageLoader,
    reference::build_labeled_descriptors,
    server::{router, AppState},
    Embedding,
};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use std::{collections::HashMap, io::Cursor, path::Path, sync::Arc};
use tower::ServiceExt; // for `oneshot`

const STRIP: u32 = 8;
const RED: [u8; 3] = [200, 0, 0];
const BLUE: [u8; 3] = [0, 0, 200];
const GREEN: [u8; 3] = [0, 200, 0];
const BLACK: [u8; 3] = [0, 0, 0];

#[derive(Default)]
struct StubEngine {
    fail_load: bool,
    panic_on_group: bool,
}

fn strip_faces(img: &DynamicImage) -> Vec<Embedding> {
    let (w, _) = img.dimensions();
    (0..w / STRIP)
        .map(|i| img.get_pixel(i * STRIP, 0))
        .filter(|px| px[0] != 0 || px[1] != 0 || px[2] != 0)
        .map(|px| {
            Embedding::from_vec(px.0[..3].iter().map(|&c| c as f32 / 255.0).collect()).unwrap()
        })
        .collect()
}

impl FaceEngine for StubEngine {
    fn ensure_loaded(&self) -> Result<()> {
        if self.fail_load {
            anyhow::bail!("model file not found: /srv/models/face_detection_yunet_2023mar.onnx");
        }
        Ok(())
    }

    fn single_descriptor(&self, img: &DynamicImage) -> Result<Option<Embedding>> {
        Ok(strip_faces(img).into_iter().next())
    }

    fn all_descriptors(&self, img: &DynamicImage) -> Result<Vec<Embedding>> {
        if self.panic_on_group {
            panic!("detector blew up");
        }
        Ok(strip_faces(img))
    }
}

fn strip_png(colors: &[[u8; 3]]) -> Vec<u8> {
    let width = STRIP * colors.len().max(1) as u32;
    let img = RgbImage::from_fn(width, STRIP, |x, _| {
        Rgb(*colors.get((x / STRIP) as usize).unwrap_or(&BLACK))
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

async fn serve_image(
    State(images): State<Arc<HashMap<String, Vec<u8>>>>,
    UrlPath(name): UrlPath<String>,
) -> impl IntoResponse {
    match images.get(&name) {
        Some(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/png")],
            bytes.clone(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Start a local image host and return its base URL.
async fn image_host() -> String {
    let mut images = HashMap::new();
    images.insert("alice.png".to_string(), strip_png(&[RED]));
    images.insert("bob.png".to_string(), strip_png(&[BLUE]));
    images.insert("empty.png".to_string(), strip_png(&[BLACK]));
    images.insert("group-alice.png".to_string(), strip_png(&[RED]));
    images.insert("group-three.png".to_string(), strip_png(&[BLUE, GREEN, RED]));
    images.insert("group-none.png".to_string(), strip_png(&[BLACK, BLACK]));
    images.insert("garbage.png".to_string(), b"definitely not a png".to_vec());

    let app = Router::new()
        .route("/:name", get(serve_image))
        .with_state(Arc::new(images));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn app_with(engine: StubEngine) -> Router {
    let state = AppState::new(Arc::new(engine), 0.6);
    router(state, Path::new(env!("CARGO_MANIFEST_DIR")), 50 * 1024 * 1024)
}

async fn post(app: Router, body: String) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post_json(app: Router, body: Value) -> (StatusCode, Value) {
    post(app, body.to_string()).await
}

#[tokio::test]
async fn alice_is_recognized_in_group() {
    let host = image_host().await;
    let body = json!({
        "dataset": [{"id": "alice", "imglink": format!("{host}/alice.png")}],
        "group_img": format!("{host}/group-alice.png"),
    });

    let (status, json) = post_json(app_with(StubEngine::default()), body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    let matches = json["matches"].as_array().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["label"], "alice");
    assert!(matches[0]["distance"].as_f64().unwrap() <= 0.6);
}

#[tokio::test]
async fn one_match_per_face_in_detector_order() {
    let host = image_host().await;
    let body = json!({
        "dataset": [
            {"id": "alice", "imglink": format!("{host}/alice.png")},
            {"id": "bob", "imglink": format!("{host}/bob.png")},
        ],
        "group_img": format!("{host}/group-three.png"),
    });

    let (status, json) = post_json(app_with(StubEngine::default()), body).await;

    assert_eq!(status, StatusCode::OK);
    let matches = json["matches"].as_array().unwrap();
    let labels: Vec<&str> = matches.iter().map(|m| m["label"].as_str().unwrap()).collect();
    assert_eq!(labels, ["bob", "unknown", "alice"]);
    for m in matches {
        assert!(m["distance"].as_f64().unwrap() >= 0.0);
    }
}

#[tokio::test]
async fn group_without_faces_yields_no_matches() {
    let host = image_host().await;
    let body = json!({
        "dataset": [{"id": "alice", "imglink": format!("{host}/alice.png")}],
        "group_img": format!("{host}/group-none.png"),
    });

    let (status, json) = post_json(app_with(StubEngine::default()), body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"success": true, "matches": []}));
}

#[tokio::test]
async fn bad_entries_are_dropped_without_failing_the_batch() {
    let host = image_host().await;
    let body = json!({
        "dataset": [
            {"id": "ghost"},
            {"imglink": format!("{host}/bob.png")},
            {"id": "", "imglink": format!("{host}/bob.png")},
            {"id": "missing", "imglink": format!("{host}/nope.png")},
            {"id": "blank", "imglink": format!("{host}/empty.png")},
            {"id": "junk", "imglink": format!("{host}/garbage.png")},
            "not an object",
            {"id": "alice", "imglink": format!("{host}/alice.png")},
        ],
        "group_img": format!("{host}/group-alice.png"),
    });

    let (status, json) = post_json(app_with(StubEngine::default()), body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["matches"][0]["label"], "alice");
}

#[tokio::test]
async fn every_valid_entry_yields_one_descriptor() {
    let host = image_host().await;
    let dataset = vec![
        json!({"id": "alice", "imglink": format!("{host}/alice.png")}),
        json!({"id": 7, "imglink": format!("{host}/bob.png")}),
        json!({"id": "alice", "imglink": format!("{host}/alice.png")}),
    ];
    let engine: Arc<dyn FaceEngine> = Arc::new(StubEngine::default());

    let labeled = build_labeled_descriptors(&dataset, &ImageLoader::default(), &engine).await;

    assert_eq!(labeled.len(), dataset.len());
    let labels: Vec<&str> = labeled.iter().map(|l| l.label.as_str()).collect();
    assert_eq!(labels, ["alice", "7", "alice"]);
    assert!(labeled.iter().all(|l| l.descriptors.len() == 1));
}

#[tokio::test]
async fn entries_missing_fields_contribute_nothing() {
    let dataset = vec![json!({"id": "a"}), json!({"imglink": "http://127.0.0.1:9/x.png"})];
    let engine: Arc<dyn FaceEngine> = Arc::new(StubEngine::default());

    let labeled = build_labeled_descriptors(&dataset, &ImageLoader::default(), &engine).await;

    assert!(labeled.is_empty());
}

#[tokio::test]
async fn empty_dataset_has_no_descriptors() {
    let body = json!({"dataset": [], "group_img": "https://x/group.jpg"});

    let (status, json) = post_json(app_with(StubEngine::default()), body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json,
        json!({"error": "No valid face descriptors could be generated from the dataset"})
    );
}

#[tokio::test]
async fn all_entries_failing_has_no_descriptors() {
    let host = image_host().await;
    let body = json!({
        "dataset": [{"id": "blank", "imglink": format!("{host}/empty.png")}],
        "group_img": format!("{host}/group-alice.png"),
    });

    let (status, json) = post_json(app_with(StubEngine::default()), body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json["error"],
        "No valid face descriptors could be generated from the dataset"
    );
}

#[tokio::test]
async fn dataset_must_be_an_array() {
    let (status, json) =
        post_json(app_with(StubEngine::default()), json!({"group_img": "https://x/g.jpg"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json, json!({"error": "Invalid dataset format", "received": null}));

    let (status, json) = post_json(
        app_with(StubEngine::default()),
        json!({"dataset": {"id": "alice"}, "group_img": "https://x/g.jpg"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid dataset format");
    assert_eq!(json["received"], json!({"id": "alice"}));
}

#[tokio::test]
async fn group_img_must_be_present() {
    for body in [
        json!({"dataset": []}),
        json!({"dataset": [], "group_img": ""}),
        json!({"dataset": [], "group_img": null}),
    ] {
        let (status, json) = post_json(app_with(StubEngine::default()), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json, json!({"error": "Missing group_img"}));
    }
}

#[tokio::test]
async fn missing_group_image_reports_status_text() {
    let host = image_host().await;
    let body = json!({
        "dataset": [{"id": "alice", "imglink": format!("{host}/alice.png")}],
        "group_img": format!("{host}/gone.png"),
    });

    let (status, json) = post_json(app_with(StubEngine::default()), body).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "Failed to process group image");
    assert!(json["message"].as_str().unwrap().contains("Not Found"));
}

#[tokio::test]
async fn undecodable_group_image_is_a_group_failure() {
    let host = image_host().await;
    let body = json!({
        "dataset": [{"id": "alice", "imglink": format!("{host}/alice.png")}],
        "group_img": format!("{host}/garbage.png"),
    });

    let (status, json) = post_json(app_with(StubEngine::default()), body).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "Failed to process group image");
    assert!(json["message"].as_str().unwrap().starts_with("Failed to decode image"));
}

#[tokio::test]
async fn model_load_failure_is_reported() {
    let engine = StubEngine {
        fail_load: true,
        ..Default::default()
    };
    let body = json!({"dataset": [], "group_img": "https://x/group.jpg"});

    let (status, json) = post_json(app_with(engine), body).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "Failed to load face recognition models");
    assert!(json["message"].as_str().unwrap().contains("model file not found"));
}

#[tokio::test]
async fn detector_panic_is_an_internal_error() {
    let host = image_host().await;
    let engine = StubEngine {
        panic_on_group: true,
        ..Default::default()
    };
    let body = json!({
        "dataset": [{"id": "alice", "imglink": format!("{host}/alice.png")}],
        "group_img": format!("{host}/group-alice.png"),
    });

    let (status, json) = post_json(app_with(engine), body).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "Internal server error");
    assert!(json["message"].is_string());
}

#[tokio::test]
async fn malformed_json_gets_a_json_error() {
    let (status, json) = post(app_with(StubEngine::default()), "{\"dataset\": [".to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid JSON body");
}

#[tokio::test]
async fn model_directory_is_served_statically() {
    let response = app_with(StubEngine::default())
        .oneshot(
            Request::builder()
                .uri("/models/Cargo.toml")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("[workspace]"));
}
