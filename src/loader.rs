//! Content loader: navigation, subresources and scripts on a worker thread.
//!
//! [`ContentLoader::load`] returns right away with a [`LoadHandle`]; the
//! worker streams [`PageEvent`]s over a channel in load order. Failures of
//! the main document become a `LoadFailed` event. Failures of stylesheets,
//! images or external scripts are logged and skipped.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use base64::Engine as Base64Engine;
use log::{debug, warn};
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::event::{EventSource, Loader, PageEvent, Pump};
use crate::surface::RenderSurface;
use crate::{CaptureConfig, Source};

/// The production [`Loader`].
#[derive(Debug, Clone)]
pub struct ContentLoader {
    config: CaptureConfig,
}

impl ContentLoader {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl Loader for ContentLoader {
    type Handle = LoadHandle;

    fn load(&self, surface: &RenderSurface, source: &Source) -> LoadHandle {
        let (tx, events) = mpsc::channel();
        let (cancel, cancelled) = mpsc::channel();

        let worker = Worker {
            tx: tx.clone(),
            cancelled,
            config: self.config.clone(),
            title: surface.title().to_string(),
            client: None,
        };
        let source = source.clone();
        let spawned = thread::Builder::new()
            .name(format!("rfshot-loader-{}", surface.id()))
            .spawn(move || worker.run(&source));
        let worker = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                let _ = tx.send(PageEvent::LoadFailed {
                    reason: format!("cannot start loader thread: {}", e),
                });
                None
            }
        };

        LoadHandle {
            events,
            cancel: Some(cancel),
            worker,
        }
    }
}

/// Event stream of one load. Dropping it cancels the worker: pending sleeps
/// wake up and no further events are produced.
///
/// Drop never blocks. A worker that has already stopped is joined; one that
/// is still inside a blocking HTTP request is left to exit on its own, which
/// happens at the latest when the request hits the client timeout
/// (`timeout_ms`). Repeated captures can therefore briefly overlap with the
/// tail of an earlier loader thread.
pub struct LoadHandle {
    events: Receiver<PageEvent>,
    // never sent on; the worker watches for disconnection
    cancel: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl LoadHandle {
    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for LoadHandle {
    fn drop(&mut self) {
        drop(self.cancel.take());
        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.is_finished() {
            if worker.join().is_err() {
                warn!("loader thread panicked");
            }
        } else {
            debug!("loader thread still busy, it stops at its next cancellation point");
        }
    }
}

impl EventSource for LoadHandle {
    fn next_event(&mut self, timeout: Duration) -> Pump {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Pump::Event(event),
            Err(RecvTimeoutError::Timeout) => Pump::Idle,
            Err(RecvTimeoutError::Disconnected) => Pump::Closed,
        }
    }
}

enum Halt {
    Cancelled,
    Failed(String),
}

type Step<T> = std::result::Result<T, Halt>;

struct Worker {
    tx: Sender<PageEvent>,
    cancelled: Receiver<()>,
    config: CaptureConfig,
    title: String,
    client: Option<Client>,
}

impl Worker {
    fn run(mut self, source: &Source) {
        match self.navigate(source) {
            Ok(()) => debug!("loader for {:?} finished", self.title),
            Err(Halt::Cancelled) => debug!("loader for {:?} cancelled", self.title),
            Err(Halt::Failed(reason)) => {
                debug!("load failed: {}", reason);
                let _ = self.tx.send(PageEvent::LoadFailed { reason });
            }
        }
    }

    fn navigate(&mut self, source: &Source) -> Step<()> {
        let (url, html, base_url) = match source {
            Source::Url(raw) => {
                let (body, final_url) = self.fetch_raw(raw).map_err(Halt::Failed)?;
                let html = String::from_utf8_lossy(&body).into_owned();
                (raw.clone(), html, final_url)
            }
            Source::Html { html, base_url } => {
                let base = base_url.as_deref().and_then(|b| match Url::parse(b) {
                    Ok(u) => Some(u),
                    Err(e) => {
                        warn!("ignoring invalid base URL {:?}: {}", b, e);
                        None
                    }
                });
                let url = base
                    .as_ref()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "about:blank".to_string());
                (url, html.clone(), base)
            }
        };

        self.emit(PageEvent::Navigated { url })?;
        self.emit(PageEvent::DocumentParsed {
            html: html.clone(),
            base_url: base_url.clone(),
        })?;

        let document = Html::parse_document(&html);

        #[cfg(feature = "scripting")]
        let scripts = if self.config.enable_javascript {
            self.run_scripts(&document, base_url.as_ref())?
        } else {
            None
        };

        self.load_stylesheets(&document, base_url.as_ref())?;
        if self.config.enable_images {
            self.load_images(&document, base_url.as_ref())?;
        }
        self.emit(PageEvent::LoadFinished)?;

        #[cfg(feature = "scripting")]
        if let Some((mut runtime, started)) = scripts {
            self.run_timers(&mut runtime, started)?;
        }
        Ok(())
    }

    fn load_stylesheets(&mut self, document: &Html, base: Option<&Url>) -> Step<()> {
        for link in select_all(document, "link[rel~=stylesheet]") {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            self.check_cancelled()?;
            match self.fetch_relative(href, base) {
                Ok(bytes) => self.emit(PageEvent::StylesheetLoaded {
                    href: href.to_string(),
                    css: String::from_utf8_lossy(&bytes).into_owned(),
                })?,
                Err(e) => warn!("skipping stylesheet {}: {}", href, e),
            }
        }
        Ok(())
    }

    fn load_images(&mut self, document: &Html, base: Option<&Url>) -> Step<()> {
        let mut seen = HashSet::new();
        for img in select_all(document, "img[src]") {
            let Some(src) = img.value().attr("src") else {
                continue;
            };
            if !seen.insert(src.to_string()) {
                continue;
            }
            self.check_cancelled()?;
            let decoded = self.fetch_relative(src, base).and_then(|bytes| {
                image::load_from_memory(&bytes)
                    .map(|img| img.to_rgba8())
                    .map_err(|e| format!("cannot decode: {}", e))
            });
            match decoded {
                Ok(image) => self.emit(PageEvent::ImageLoaded {
                    src: src.to_string(),
                    image: Arc::new(image),
                })?,
                Err(e) => warn!("skipping image {}: {}", src, e),
            }
        }
        Ok(())
    }

    #[cfg(feature = "scripting")]
    fn run_scripts(
        &mut self,
        document: &Html,
        base: Option<&Url>,
    ) -> Step<Option<(crate::script::ScriptRuntime, std::time::Instant)>> {
        use crate::script::{ScriptLimits, ScriptRuntime};

        let scripts: Vec<ElementRef<'_>> = select_all(document, "script")
            .into_iter()
            .filter(|s| is_javascript(s.value().attr("type")))
            .collect();
        if scripts.is_empty() {
            return Ok(None);
        }

        let title = select_all(document, "title")
            .first()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        let limits = ScriptLimits {
            loop_iteration_limit: self.config.script_loop_iteration_limit,
            recursion_limit: self.config.script_recursion_limit,
        };
        let mut runtime = match ScriptRuntime::new(&title, limits) {
            Ok(rt) => rt,
            Err(e) => {
                warn!("scripts disabled for this page: {}", e);
                return Ok(None);
            }
        };

        let started = std::time::Instant::now();
        for script in scripts {
            self.check_cancelled()?;
            let code = match script.value().attr("src") {
                Some(src) => match self.fetch_relative(src, base) {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) => {
                        warn!("skipping script {}: {}", src, e);
                        continue;
                    }
                },
                None => script.text().collect(),
            };
            let output = runtime.run(&code);
            self.emit_script_output(output)?;
        }
        Ok(Some((runtime, started)))
    }

    /// Fire pending timers in due order, sleeping in real time until each
    /// one is due on the script clock.
    #[cfg(feature = "scripting")]
    fn run_timers(
        &mut self,
        runtime: &mut crate::script::ScriptRuntime,
        started: std::time::Instant,
    ) -> Step<()> {
        let mut fired = 0usize;
        while let Some((index, due)) = runtime.next_timer() {
            if fired >= self.config.max_script_timers {
                debug!("timer budget of {} callbacks exhausted", fired);
                break;
            }
            let elapsed = started.elapsed();
            if due > elapsed {
                self.sleep(due - elapsed)?;
            } else {
                self.check_cancelled()?;
            }
            let output = runtime.fire_timer(index);
            fired += 1;
            self.emit_script_output(output)?;
        }
        Ok(())
    }

    #[cfg(feature = "scripting")]
    fn emit_script_output(&mut self, output: crate::script::ScriptOutput) -> Step<()> {
        let visual = output.is_visual();
        for line in output.console {
            self.emit(PageEvent::Console {
                level: line.level,
                text: line.text,
            })?;
        }
        if visual {
            self.emit(PageEvent::ScriptMutations {
                mutations: output.mutations,
                title: output.title,
            })?;
        }
        Ok(())
    }

    fn emit(&self, event: PageEvent) -> Step<()> {
        self.tx.send(event).map_err(|_| Halt::Cancelled)
    }

    fn check_cancelled(&self) -> Step<()> {
        match self.cancelled.try_recv() {
            Err(TryRecvError::Empty) => Ok(()),
            _ => Err(Halt::Cancelled),
        }
    }

    fn sleep(&self, duration: Duration) -> Step<()> {
        match self.cancelled.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => Ok(()),
            _ => Err(Halt::Cancelled),
        }
    }

    fn fetch_relative(&mut self, reference: &str, base: Option<&Url>) -> Result<Vec<u8>, String> {
        if has_scheme(reference, "data") {
            return decode_data_url(reference);
        }
        let url = match base {
            Some(base) => base.join(reference),
            None => Url::parse(reference),
        }
        .map_err(|e| format!("cannot resolve {:?}: {}", reference, e))?;
        self.fetch(&url).map(|(bytes, _)| bytes)
    }

    /// Fetch a top-level document. Returns the body and the URL relative
    /// references resolve against.
    fn fetch_raw(&mut self, raw: &str) -> Result<(Vec<u8>, Option<Url>), String> {
        let raw = raw.trim();
        if has_scheme(raw, "data") {
            return decode_data_url(raw).map(|bytes| (bytes, None));
        }
        let url = Url::parse(raw).map_err(|e| format!("invalid URL {:?}: {}", raw, e))?;
        self.fetch(&url)
    }

    fn fetch(&mut self, url: &Url) -> Result<(Vec<u8>, Option<Url>), String> {
        match url.scheme() {
            "http" | "https" => {
                let resp = self
                    .client()?
                    .get(url.clone())
                    .header("User-Agent", self.config.user_agent.clone())
                    .send()
                    .map_err(|e| format!("Failed to fetch {}: {}", url, e))?;
                let status = resp.status();
                if status.is_client_error() || status.is_server_error() {
                    return Err(format!("{} responded with status {}", url, status));
                }
                let final_url = resp.url().clone();
                let body = resp
                    .bytes()
                    .map_err(|e| format!("Failed to read response body: {}", e))?;
                Ok((body.to_vec(), Some(final_url)))
            }
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| format!("{} is not a local file path", url))?;
                let body = std::fs::read(&path)
                    .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
                Ok((body, Some(url.clone())))
            }
            "data" => decode_data_url(url.as_str()).map(|bytes| (bytes, None)),
            "about" if url.path() == "blank" => Ok((Vec::new(), None)),
            other => Err(format!("unsupported URL scheme {:?} in {}", other, url)),
        }
    }

    // Built on first use so no HTTP runtime is started for local content.
    fn client(&mut self) -> Result<&Client, String> {
        if self.client.is_none() {
            let mut headers = reqwest::header::HeaderMap::new();
            for (name, value) in &self.config.headers {
                match (
                    reqwest::header::HeaderName::from_bytes(name.as_bytes()),
                    reqwest::header::HeaderValue::from_str(value),
                ) {
                    (Ok(n), Ok(v)) => {
                        headers.insert(n, v);
                    }
                    _ => warn!("ignoring invalid header {:?}", name),
                }
            }
            let client = Client::builder()
                .timeout(Duration::from_millis(self.config.timeout_ms))
                .default_headers(headers)
                .build()
                .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
            self.client = Some(client);
        }
        self.client
            .as_ref()
            .ok_or_else(|| "HTTP client unavailable".to_string())
    }
}

fn select_all<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(sel) => document.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

fn has_scheme(reference: &str, scheme: &str) -> bool {
    reference.len() > scheme.len()
        && reference.as_bytes()[scheme.len()] == b':'
        && reference[..scheme.len()].eq_ignore_ascii_case(scheme)
}

#[cfg(feature = "scripting")]
fn is_javascript(type_attr: Option<&str>) -> bool {
    match type_attr.map(|t| t.trim().to_ascii_lowercase()) {
        None => true,
        Some(t) => t.is_empty() || t == "text/javascript" || t == "application/javascript",
    }
}

/// Decode a `data:` URL payload, base64 or percent-encoded.
pub fn decode_data_url(raw: &str) -> Result<Vec<u8>, String> {
    if !has_scheme(raw, "data") {
        return Err("not a data URL".to_string());
    }
    let (meta, payload) = raw[5..]
        .split_once(',')
        .ok_or_else(|| "malformed data URL: missing ','".to_string())?;
    let decoded = percent_decode(payload);
    if meta.trim_end().to_ascii_lowercase().ends_with(";base64") {
        let compact: Vec<u8> = decoded
            .into_iter()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| format!("invalid base64 in data URL: {}", e))
    } else {
        Ok(decoded)
    }
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(v) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}
