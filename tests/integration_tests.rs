use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;

use image::{ImageFormat, Rgba, RgbaImage};
use rfshot::{CaptureConfig, CaptureRequest, ErrorKind, Source, TimeoutPolicy};
use tiny_http::{Header, Response, Server};

fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba(rgba));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Serve `routes` as `(path, content type, body, delay)` until the test ends.
fn serve(routes: Vec<(&'static str, &'static str, Vec<u8>, Duration)>) -> SocketAddr {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    std::thread::spawn(move || {
        for req in server.incoming_requests() {
            let route = routes.iter().find(|(path, ..)| *path == req.url()).cloned();
            std::thread::spawn(move || match route {
                Some((_, content_type, body, delay)) => {
                    std::thread::sleep(delay);
                    let header = Header::from_bytes("Content-Type", content_type).unwrap();
                    let _ = req.respond(Response::from_data(body).with_header(header));
                }
                None => {
                    let _ = req.respond(Response::from_string("not found").with_status_code(404));
                }
            });
        }
    });
    addr
}

#[test]
fn linked_stylesheet_and_image_are_rendered() {
    let html = r#"<html><head><link rel="stylesheet" href="/style.css"></head>
        <body><img src="/dot.png"></body></html>"#;
    let addr = serve(vec![
        ("/", "text/html", html.as_bytes().to_vec(), Duration::ZERO),
        ("/style.css", "text/css", b"body { background: #0000ff }".to_vec(), Duration::from_millis(20)),
        ("/dot.png", "image/png", png_bytes(16, 16, [0, 255, 0, 255]), Duration::from_millis(40)),
    ]);

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("page.png");
    let request = CaptureRequest::new(64, 48, "Sample", &out)
        .with_source(Source::Url(format!("http://{}/", addr)));
    let config = CaptureConfig {
        settle_ms: 100,
        timeout_ms: 5000,
        ..CaptureConfig::default()
    };

    let result = rfshot::capture(&request, &config);
    assert!(result.success, "{:?}", result);
    let img = image::open(&out).unwrap().to_rgba8();
    assert_eq!(img.get_pixel(0, 0).0, [0, 0, 255, 255]);
    // body margin puts the image at (8, 8)
    assert_eq!(img.get_pixel(12, 12).0, [0, 255, 0, 255]);
}

#[test]
fn http_error_status_is_load_failed() {
    let addr = serve(vec![]);
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("page.png");
    let request = CaptureRequest::new(16, 16, "Sample", &out)
        .with_source(Source::Url(format!("http://{}/missing", addr)));
    let result = rfshot::capture(&request, &CaptureConfig::default());
    assert_eq!(result.error, Some(ErrorKind::LoadFailed));
    assert!(!out.exists());
}

#[test]
fn missing_subresources_do_not_fail_the_capture() {
    let html = r#"<html><head><link rel="stylesheet" href="/gone.css"></head>
        <body style="background: red"><img src="/gone.png"></body></html>"#;
    let addr = serve(vec![("/", "text/html", html.as_bytes().to_vec(), Duration::ZERO)]);

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("page.png");
    let request = CaptureRequest::new(16, 16, "Sample", &out)
        .with_source(Source::Url(format!("http://{}/", addr)));
    let config = CaptureConfig {
        settle_ms: 30,
        ..CaptureConfig::default()
    };
    let result = rfshot::capture(&request, &config);
    assert!(result.success, "{:?}", result);
    assert_eq!(image::open(&out).unwrap().to_rgba8().get_pixel(1, 1).0, [255, 0, 0, 255]);
}

#[test]
fn slow_subresource_times_out_according_to_policy() {
    let html = r#"<html><head><link rel="stylesheet" href="/slow.css"></head>
        <body style="background: red"></body></html>"#;
    let addr = serve(vec![
        ("/", "text/html", html.as_bytes().to_vec(), Duration::ZERO),
        ("/slow.css", "text/css", b"body { background: blue }".to_vec(), Duration::from_secs(3)),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let url = format!("http://{}/", addr);

    let strict = CaptureConfig {
        settle_ms: 50,
        timeout_ms: 400,
        ..CaptureConfig::default()
    };
    let out = dir.path().join("strict.png");
    let request = CaptureRequest::new(16, 16, "Sample", &out).with_source(Source::Url(url.clone()));
    let result = rfshot::capture(&request, &strict);
    assert_eq!(result.error, Some(ErrorKind::RenderTimeout));
    assert_eq!(result.exit_code(), 5);
    assert!(!out.exists());

    let lenient = CaptureConfig {
        timeout_policy: TimeoutPolicy::BestEffort,
        ..strict
    };
    let out = dir.path().join("lenient.png");
    let request = CaptureRequest::new(16, 16, "Sample", &out).with_source(Source::Url(url));
    let result = rfshot::capture(&request, &lenient);
    assert!(!result.success);
    assert_eq!(result.error, Some(ErrorKind::RenderTimeout));
    assert_eq!(result.bytes_written, Some(std::fs::metadata(&out).unwrap().len()));
    // whatever was painted before the deadline
    assert_eq!(image::open(&out).unwrap().to_rgba8().get_pixel(1, 1).0, [255, 0, 0, 255]);
}

#[tokio::test]
async fn async_facade_reports_the_same_result() {
    let addr = serve(vec![(
        "/",
        "text/html",
        b"<body style='background: #123456'></body>".to_vec(),
        Duration::ZERO,
    )]);
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("async.png");
    let request = CaptureRequest::new(8, 8, "Sample", &out)
        .with_source(Source::Url(format!("http://{}/", addr)));
    let config = CaptureConfig {
        settle_ms: 30,
        ..CaptureConfig::default()
    };

    let result = rfshot::capture_async(request, config).await;
    assert!(result.success, "{:?}", result);
    assert_eq!(image::open(&out).unwrap().to_rgba8().get_pixel(0, 0).0, [0x12, 0x34, 0x56, 255]);
}

#[test]
fn image_scaled_far_beyond_the_surface_is_clipped() {
    let html = r#"<html><body style="margin: 0"><img src="/dot.png" width="20000" height="20000"></body></html>"#;
    let addr = serve(vec![
        ("/", "text/html", html.as_bytes().to_vec(), Duration::ZERO),
        ("/dot.png", "image/png", png_bytes(1, 1, [0, 255, 0, 255]), Duration::ZERO),
    ]);

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("page.png");
    let request = CaptureRequest::new(8, 8, "Sample", &out)
        .with_source(Source::Url(format!("http://{}/", addr)));
    let config = CaptureConfig {
        settle_ms: 50,
        timeout_ms: 2000,
        ..CaptureConfig::default()
    };

    let started = std::time::Instant::now();
    let result = rfshot::capture(&request, &config);
    assert!(result.success, "{:?}", result);
    assert!(started.elapsed() < Duration::from_secs(2));
    let img = image::open(&out).unwrap().to_rgba8();
    assert!(img.pixels().all(|p| p.0 == [0, 255, 0, 255]));
}
