#![cfg(feature = "scripting")]

use std::path::Path;

use rfshot::{CaptureConfig, CaptureRequest, ErrorKind, Source};

fn capture_page(dir: &Path, body_script: &str, settle_ms: u64, timeout_ms: u64) -> (rfshot::CaptureResult, [u8; 4]) {
    let out = dir.join("page.png");
    let _ = std::fs::remove_file(&out);
    let html = format!(
        "<html><body style=\"background: red\"><script>{}</script></body></html>",
        body_script
    );
    let request = CaptureRequest::new(32, 32, "Sample", &out).with_source(Source::Html {
        html,
        base_url: None,
    });
    let config = CaptureConfig {
        settle_ms,
        timeout_ms,
        ..CaptureConfig::default()
    };
    let result = rfshot::capture(&request, &config);
    let pixel = if out.exists() {
        image::open(&out).unwrap().to_rgba8().get_pixel(16, 16).0
    } else {
        [0, 0, 0, 0]
    };
    (result, pixel)
}

#[test]
fn timer_inside_settle_window_is_captured() {
    let dir = tempfile::tempdir().unwrap();
    let (result, pixel) = capture_page(
        dir.path(),
        "setTimeout(function () { document.body.style.background = 'blue'; }, 30);",
        500,
        5000,
    );
    assert!(result.success, "{:?}", result);
    assert_eq!(pixel, [0, 0, 255, 255]);
}

#[test]
fn timer_after_settle_window_is_missed() {
    let dir = tempfile::tempdir().unwrap();
    let (result, pixel) = capture_page(
        dir.path(),
        "setTimeout(function () { document.body.style.background = 'blue'; }, 1500);",
        20,
        5000,
    );
    assert!(result.success, "{:?}", result);
    assert_eq!(pixel, [255, 0, 0, 255]);
}

#[test]
fn animation_frames_settle_after_the_last_change() {
    let dir = tempfile::tempdir().unwrap();
    let script = r#"
        var frames = 0;
        function step() {
            frames += 1;
            if (frames < 5) { requestAnimationFrame(step); }
            else { document.body.style.backgroundColor = 'rgb(0, 128, 0)'; }
        }
        requestAnimationFrame(step);
    "#;
    let (result, pixel) = capture_page(dir.path(), script, 300, 5000);
    assert!(result.success, "{:?}", result);
    assert_eq!(pixel, [0, 128, 0, 255]);
}

#[test]
fn script_errors_do_not_fail_the_capture() {
    let dir = tempfile::tempdir().unwrap();
    let (result, pixel) = capture_page(
        dir.path(),
        "document.body.style.background = 'blue'; undefinedFunction();",
        30,
        5000,
    );
    assert!(result.success, "{:?}", result);
    assert_eq!(pixel, [0, 0, 255, 255]);
}

#[test]
fn page_that_never_settles_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let script = r#"
        var on = false;
        function flip() {
            on = !on;
            document.body.style.background = on ? 'blue' : 'red';
            setTimeout(flip, 10);
        }
        flip();
    "#;
    let (result, pixel) = capture_page(dir.path(), script, 100, 500);
    assert_eq!(result.error, Some(ErrorKind::RenderTimeout));
    assert_eq!(pixel, [0, 0, 0, 0], "no file is written under the fail policy");
}
