//! End-to-end tests: widget -> relay (real socket) -> asset host (wiremock).

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use serde_json::json;
use tokio::net::TcpListener;
use url::Url;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use crate::Application;
use crate::asset_host::cloudinary;
use crate::config::{AssetHostConfig, Config};
use crate::naming::StorageKey;
use crate::types::{FileFilter, ResourceType};
use crate::widget::{BearerToken, RelayClient, SelectedFile, UploadWidget, WidgetConfig, WidgetError, WidgetState};

const API_SECRET: &str = "relay-test-secret";

/// Parts of a captured multipart request, keyed by field name.
fn form_parts(req: &Request) -> HashMap<String, Bytes> {
    let content_type = req
        .headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .expect("multipart request should carry a content type");
    let boundary = multer::parse_boundary(content_type).unwrap();
    let body = Bytes::from(req.body.clone());
    let mut multipart = multer::Multipart::new(futures::stream::once(async move { Ok::<_, std::io::Error>(body) }), boundary);

    // The whole body is already in memory, so this never waits on I/O
    futures::executor::block_on(async move {
        let mut parts = HashMap::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_string();
            parts.insert(name, field.bytes().await.unwrap());
        }
        parts
    })
}

/// Value of a text part in a multipart request.
fn form_field(req: &Request, name: &str) -> Option<String> {
    form_parts(req).get(name).map(|value| String::from_utf8_lossy(value).into_owned())
}

/// Asset host stand-in that verifies the request signature and echoes the stored location.
fn cloudinary_response(req: &Request) -> ResponseTemplate {
    let parts = form_parts(req);
    let field = |name: &str| parts.get(name).map(|value| String::from_utf8_lossy(value).into_owned());

    let mut params = BTreeMap::new();
    for key in ["folder", "public_id", "timestamp", "format"] {
        if let Some(value) = field(key) {
            params.insert(key, value);
        }
    }
    if field("signature") != Some(cloudinary::sign(&params, API_SECRET)) {
        return ResponseTemplate::new(401).set_body_json(json!({ "error": { "message": "Invalid Signature" } }));
    }

    let resource_type = req.url.path_segments().and_then(|mut s| s.nth(2)).unwrap_or("raw").to_string();
    let public_id = format!("{}/{}", params["folder"], params["public_id"]);
    let file = match params.get("format") {
        Some(format) => format!("{public_id}.{format}"),
        None => public_id.clone(),
    };

    ResponseTemplate::new(200).set_body_json(json!({
        "secure_url": format!("https://res.cloudinary.com/demo/{resource_type}/upload/v1700000000/{file}"),
        "public_id": public_id,
        "resource_type": resource_type,
    }))
}

async fn mount_host(expected_calls: u64) -> MockServer {
    let host = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(cloudinary_response)
        .expect(expected_calls)
        .mount(&host)
        .await;
    host
}

fn relay_config(host: &MockServer) -> Config {
    Config {
        asset_host: AssetHostConfig {
            cloud_name: Some("demo".to_string()),
            api_key: Some("123456".to_string()),
            api_secret: Some(API_SECRET.to_string()),
            api_base_url: Url::parse(&host.uri()).unwrap(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Start the relay on an ephemeral port and return its base URL.
async fn spawn_relay(config: Config) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Application::new(config).await.unwrap();
    tokio::spawn(async move {
        app.serve_on(listener, std::future::pending()).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/")).unwrap()
}

fn widget(relay: &Url, path: &str, config: WidgetConfig) -> UploadWidget {
    let client = RelayClient::new(relay.join(path).unwrap()).unwrap();
    UploadWidget::new(config, client, BearerToken::new("dashboard-session"))
}

/// A photo-like JPEG well above the compression budget.
fn large_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut seed = 0x2545_F491_u32;
    let img = image::ImageBuffer::from_fn(width, height, |_, _| {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        image::Rgb([seed as u8, (seed >> 8) as u8, (seed >> 16) as u8])
    });
    let mut buf = std::io::Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 95);
    image::DynamicImage::ImageRgb8(img).write_with_encoder(encoder).unwrap();
    buf.into_inner()
}

#[test_log::test(tokio::test)]
async fn test_large_jpeg_is_compressed_and_stored_as_image() {
    let host = mount_host(1).await;
    let relay = spawn_relay(relay_config(&host)).await;
    let config = WidgetConfig::builder().filter(FileFilter::images()).show_preview(true).build();
    let widget = widget(&relay, "upload/products", config);

    let original = large_jpeg(1200, 900);
    assert!(original.len() as u64 > config_budget());

    let mut callbacks = Vec::new();
    let results = widget
        .drop_files(
            vec![SelectedFile::new("Red Shoe.jpg", Some("image/jpeg"), original.clone())],
            |result| callbacks.push(result),
        )
        .await
        .unwrap();

    assert_eq!(callbacks.len(), 1);
    let result = &results[0];
    assert_eq!(result.resource_type, ResourceType::Image);
    assert_eq!(result.secure_url.scheme(), "https");
    assert_eq!(result.preview.as_ref(), Some(&result.secure_url));
    assert_eq!(result.original_filename, "Red_Shoe");
    assert!(result.secure_url.path().starts_with("/demo/image/upload/"));

    let requests = host.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), "/v1_1/demo/image/upload");
    let stored = &form_parts(&requests[0])["file"];
    assert!(stored.len() < original.len());
    assert!(stored.len() as u64 <= config_budget());
    assert_eq!(form_field(&requests[0], "format").as_deref(), Some("jpg"));
    assert!(matches!(widget.state(), WidgetState::Complete { inline_preview: Some(_), .. }));
}

fn config_budget() -> u64 {
    crate::widget::CompressionOptions::default().max_bytes
}

#[test_log::test(tokio::test)]
async fn test_pdf_gets_page_preview_and_is_sent_unchanged() {
    let host = mount_host(1).await;
    let relay = spawn_relay(relay_config(&host)).await;
    let config = WidgetConfig::builder().filter(FileFilter::images_or_pdf()).build();
    let widget = widget(&relay, "upload/products", config);

    let mut pdf = b"%PDF-1.7\n".to_vec();
    pdf.resize(3 * 1024 * 1024, b'x');

    let result = widget
        .drop_files(vec![SelectedFile::new("catalog.pdf", Some("application/pdf"), pdf.clone())], |_| {})
        .await
        .unwrap()
        .remove(0);

    assert_eq!(result.resource_type, ResourceType::Raw);
    let preview = result.preview.expect("pdf should get a preview");
    assert!(preview.as_str().contains("/raw/upload/w_300,h_400,pg_1/v1700000000/products/catalog_"));
    assert!(result.secure_url.path().ends_with(".pdf"));

    let requests = host.received_requests().await.unwrap();
    assert_eq!(requests[0].url.path(), "/v1_1/demo/raw/upload");
    assert_eq!(form_parts(&requests[0])["file"], pdf, "PDF bytes must reach the host unchanged");
    assert!(form_field(&requests[0], "public_id").unwrap().ends_with(".pdf"));
}

#[test_log::test(tokio::test)]
async fn test_svg_skips_compression_and_is_sent_unchanged() {
    let host = mount_host(1).await;
    let relay = spawn_relay(relay_config(&host)).await;
    let config = WidgetConfig::builder().filter(FileFilter::images()).show_preview(true).build();
    let widget = widget(&relay, "upload/banners", config);

    let mut svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="4000" height="4000">"#.to_vec();
    for i in 0..20_000 {
        svg.extend_from_slice(format!(r#"<circle cx="{}" cy="{}" r="3"/>"#, i % 4000, i / 5).as_bytes());
    }
    svg.extend_from_slice(b"</svg>");
    assert!(svg.len() as u64 > config_budget());

    let result = widget
        .drop_files(vec![SelectedFile::new("Logo.svg", Some("image/svg+xml"), svg.clone())], |_| {})
        .await
        .unwrap()
        .remove(0);

    assert_eq!(result.resource_type, ResourceType::Image);
    assert!(result.secure_url.path().ends_with(".svg"));

    let requests = host.received_requests().await.unwrap();
    assert_eq!(requests[0].url.path(), "/v1_1/demo/image/upload");
    assert_eq!(form_parts(&requests[0])["file"], svg, "SVG bytes must reach the host unchanged");
    assert_eq!(form_field(&requests[0], "format").as_deref(), Some("svg"));
}

#[test_log::test(tokio::test)]
async fn test_wrong_format_is_rejected_in_the_widget() {
    let host = mount_host(0).await;
    let relay = spawn_relay(relay_config(&host)).await;
    let config = WidgetConfig::builder().filter(FileFilter::pdf()).build();
    let widget = widget(&relay, "upload/stock_attachments", config);

    let err = widget
        .drop_files(vec![SelectedFile::new("notes.txt", Some("text/plain"), &b"hello"[..])], |_| {
            panic!("no result expected")
        })
        .await
        .unwrap_err();

    assert!(matches!(err, WidgetError::UnsupportedFormat { .. }));
    assert_eq!(
        widget.state(),
        WidgetState::Rejected {
            message: "The selected file format is not supported.".to_string()
        }
    );
}

#[test_log::test(tokio::test)]
async fn test_missing_secret_fails_without_contacting_host() {
    let host = mount_host(0).await;
    let mut config = relay_config(&host);
    config.asset_host.api_secret = None;
    let relay = spawn_relay(config).await;
    let widget = widget(&relay, "upload", WidgetConfig::default());

    let err = widget
        .drop_files(vec![SelectedFile::new("a.pdf", Some("application/pdf"), &b"%PDF"[..])], |_| {})
        .await
        .unwrap_err();

    match &err {
        WidgetError::Server { status, message } => {
            assert_eq!(*status, 400);
            assert_eq!(message, "Missing asset host configuration: api_secret");
        }
        other => panic!("expected Server error, got {other:?}"),
    }
    assert!(matches!(widget.state(), WidgetState::Failed { .. }));
}

#[test_log::test(tokio::test)]
async fn test_same_filename_twice_gets_distinct_assets() {
    let host = mount_host(2).await;
    let relay = spawn_relay(relay_config(&host)).await;
    let widget = widget(&relay, "upload/stock_attachments", WidgetConfig::default());

    let mut results = Vec::new();
    for _ in 0..2 {
        let file = SelectedFile::new("report.pdf", Some("application/pdf"), &b"%PDF-1.4 report"[..]);
        results.extend(widget.drop_files(vec![file], |_| {}).await.unwrap());
    }

    assert_eq!(results.len(), 2);
    assert_ne!(results[0].storage_key, results[1].storage_key);
    assert_ne!(results[0].secure_url, results[1].secure_url);
    assert_ne!(results[0].public_id, results[1].public_id);
    assert!(results.iter().all(|r| r.original_filename == "report"));
    assert!(results.iter().all(|r| r.preview.is_none()));
}

#[test_log::test(tokio::test)]
async fn test_progress_is_monotonic_and_bounded() {
    let host = mount_host(1).await;
    let relay = spawn_relay(relay_config(&host)).await;
    let widget = widget(&relay, "upload/stock_attachments", WidgetConfig::default());

    let mut states = widget.subscribe();
    let collector = tokio::spawn(async move {
        let mut readings = Vec::new();
        while states.changed().await.is_ok() {
            if let WidgetState::Uploading { progress } = *states.borrow_and_update() {
                readings.push(progress);
            }
        }
        readings
    });

    let payload = vec![0u8; 2 * 1024 * 1024];
    widget
        .drop_files(vec![SelectedFile::new("dump.bin", Some("application/octet-stream"), payload)], |_| {})
        .await
        .unwrap();
    assert_eq!(*widget.progress().borrow(), 100);

    drop(widget);
    let readings = collector.await.unwrap();
    assert!(!readings.is_empty());
    assert!(readings.windows(2).all(|w| w[0] <= w[1]));
    assert!(readings.iter().all(|p| *p <= 100));
}

#[test]
fn test_classification_is_idempotent_and_closed() {
    let samples = [
        None,
        Some("image/jpeg"),
        Some("IMAGE/WEBP; q=0.9"),
        Some("video/quicktime"),
        Some("application/pdf"),
        Some("text/plain"),
        Some(""),
        Some("garbage"),
    ];
    for mime in samples {
        let first = ResourceType::from_mime(mime);
        assert_eq!(first, ResourceType::from_mime(mime));
        assert!(matches!(first, ResourceType::Image | ResourceType::Video | ResourceType::Raw));
    }
}

#[test]
fn test_storage_keys_for_same_name_differ() {
    let keys: std::collections::HashSet<String> =
        (0..500).map(|_| StorageKey::generate("report.pdf").to_string()).collect();
    assert_eq!(keys.len(), 500);
}
