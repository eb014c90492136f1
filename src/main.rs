//! rfshot: render a page offscreen and write it to a PNG file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use env_logger::{Builder, Env};
use log::{error, info};
use rfshot::rendering::style::parse_color;
use rfshot::{CaptureConfig, CaptureRequest, Rgba, Source, TimeoutPolicy};

#[derive(Parser)]
#[command(name = "rfshot")]
#[command(about = "Render a web page offscreen and capture it as PNG")]
#[command(group(ArgGroup::new("source").args(["url", "html", "html_file"])))]
struct Cli {
    /// Surface width in pixels
    #[arg(long, default_value_t = 640)]
    width: u32,
    /// Surface height in pixels
    #[arg(long, default_value_t = 480)]
    height: u32,
    /// Surface title (metadata only)
    #[arg(long, default_value = "Sample")]
    title: String,
    /// Output file path [default: result.png next to the executable]
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Page to load (http, https, file, data or about:blank)
    #[arg(long)]
    url: Option<String>,
    /// Inline HTML document
    #[arg(long)]
    html: Option<String>,
    /// Read the HTML document from a file
    #[arg(long)]
    html_file: Option<PathBuf>,
    /// Overall deadline in milliseconds
    #[arg(long, default_value_t = 30000)]
    timeout_ms: u64,
    /// Quiet window in milliseconds before the frame counts as stable
    #[arg(long, default_value_t = 200)]
    settle_ms: u64,
    /// What to do when the deadline passes first
    #[arg(long, value_enum, default_value_t = OnTimeout::Fail)]
    on_timeout: OnTimeout,
    /// Do not run page scripts
    #[arg(long)]
    no_js: bool,
    /// User agent for HTTP requests
    #[arg(long)]
    user_agent: Option<String>,
    /// Canvas colour where the page paints nothing (CSS colour)
    #[arg(long, value_parser = parse_background)]
    background: Option<Rgba>,
    /// Print the result as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnTimeout {
    Fail,
    BestEffort,
}

fn parse_background(value: &str) -> std::result::Result<Rgba, String> {
    parse_color(value).ok_or_else(|| format!("unrecognised colour {:?}", value))
}

impl Cli {
    fn source(&self) -> Result<Source> {
        if let Some(url) = &self.url {
            return Ok(Source::Url(url.clone()));
        }
        if let Some(html) = &self.html {
            return Ok(Source::Html {
                html: html.clone(),
                base_url: None,
            });
        }
        if let Some(path) = &self.html_file {
            let html = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let base_url = std::fs::canonicalize(path)
                .ok()
                .and_then(|p| url::Url::from_file_path(p).ok())
                .map(|u| u.to_string());
            return Ok(Source::Html { html, base_url });
        }
        Ok(Source::default())
    }

    fn config(&self) -> CaptureConfig {
        let defaults = CaptureConfig::default();
        CaptureConfig {
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent.clone()),
            timeout_ms: self.timeout_ms,
            settle_ms: self.settle_ms,
            timeout_policy: match self.on_timeout {
                OnTimeout::Fail => TimeoutPolicy::Fail,
                OnTimeout::BestEffort => TimeoutPolicy::BestEffort,
            },
            enable_javascript: !self.no_js,
            background: self.background.unwrap_or(defaults.background),
            ..defaults
        }
    }
}

fn default_output() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate the executable")?;
    Ok(exe
        .parent()
        .map(|dir| dir.join("result.png"))
        .unwrap_or_else(|| PathBuf::from("result.png")))
}

fn run(cli: Cli) -> Result<i32> {
    let source = cli.source()?;
    let output_path = match &cli.output {
        Some(path) => path.clone(),
        None => default_output()?,
    };
    let request = CaptureRequest {
        width: cli.width,
        height: cli.height,
        title: cli.title.clone(),
        output_path,
        source,
    };

    let result = rfshot::capture(&request, &cli.config());
    if cli.json {
        println!("{}", serde_json::to_string(&result)?);
    }
    Ok(result.exit_code())
}

fn main() {
    Builder::from_env(Env::default().filter_or("RUST_LOG", "info")).init();
    info!("Start");

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
