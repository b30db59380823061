use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use tileworks_infra::variants::{HttpVariantClient, VariantSource, VariantSourceError};
use tileworks_media::{PresetTable, WorkerPool};
use tileworks_worker::app::{WorkerState, build_app};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port.
        let state = WorkerState::new(
            WorkerPool::new(2).unwrap(),
            Arc::new(PresetTable::standard()),
            82,
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, build_app(state)).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn client(&self) -> HttpVariantClient {
        HttpVariantClient::new(&self.base_url, Duration::from_secs(30)).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

#[tokio::test]
async fn client_and_server_agree_on_the_contract() {
    let server = TestServer::spawn().await;

    let variants = server
        .client()
        .generate(&png(3000, 1500), &["products", "details"])
        .await
        .unwrap();

    assert_eq!(variants.len(), 2);
    let card = image::load_from_memory(&variants[0].bytes).unwrap();
    assert_eq!(variants[0].preset_name, "products");
    assert_eq!((card.width(), card.height()), (640, 400));

    let detail = image::load_from_memory(&variants[1].bytes).unwrap();
    assert_eq!((detail.width(), detail.height()), (2400, 1200));
}

#[tokio::test]
async fn small_sources_are_not_upscaled() {
    let server = TestServer::spawn().await;

    let variants = server.client().generate(&png(300, 200), &["slides"]).await.unwrap();

    let slide = image::load_from_memory(&variants[0].bytes).unwrap();
    assert_eq!((slide.width(), slide.height()), (300, 200));
}

#[tokio::test]
async fn server_errors_surface_as_status_errors() {
    let server = TestServer::spawn().await;

    let err = server.client().generate(b"not an image", &["slides"]).await.unwrap_err();
    match err {
        VariantSourceError::Status { status, body } => {
            assert_eq!(status, 422);
            assert!(body.contains("undecodable_image"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = server.client().generate(&png(10, 10), &["banner"]).await.unwrap_err();
    assert!(matches!(err, VariantSourceError::Status { status: 400, .. }));
}

#[tokio::test]
async fn health_endpoint_responds() {
    let server = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);
}
