//! peerfetch CLI binary.
//!
//! Answers a WebRTC offer, then fetches one resource from the peer over the
//! data channel.
//!
//! # Commands
//!
//! - `fetch` - Negotiate from an offer and fetch a target
//! - `config` - Print the effective configuration

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use peerfetch::{
    Body, Config, FilePart, Form, PeerSession, Progress, Request, Response, SessionDescription,
    VERSION,
};
use tokio::io::AsyncWriteExt;

#[derive(Parser)]
#[command(name = "peerfetch")]
#[command(version = VERSION)]
#[command(about = "Fetch HTTP resources from a peer over a WebRTC data channel", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer an offer and fetch a target from the peer
    Fetch {
        /// Request target (path or URL)
        #[arg(default_value = "/")]
        target: String,

        /// Offer JSON file (or - for stdin)
        #[arg(long, default_value = "-")]
        offer: String,

        /// Write the answer JSON here (default: stderr)
        #[arg(long)]
        answer: Option<PathBuf>,

        /// Request method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request header, `Name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Text request body
        #[arg(short, long, conflicts_with_all = ["form", "file"])]
        data: Option<String>,

        /// Multipart text field, `name=value` (repeatable)
        #[arg(short = 'F', long)]
        form: Vec<String>,

        /// Multipart file field, `name=@path` (repeatable)
        #[arg(long)]
        file: Vec<String>,

        /// Write the body here (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Name the output after the response's attachment file name
        #[arg(short = 'O', long, conflicts_with = "output")]
        remote_name: bool,

        /// Print status line and headers to stderr
        #[arg(short, long)]
        include: bool,

        /// Config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            target,
            offer,
            answer,
            method,
            headers,
            data,
            form,
            file,
            output,
            remote_name,
            include,
            config,
            verbose,
        } => {
            init_logging(verbose);
            let config = load_config(config.as_deref())?;
            let request = RequestArgs {
                target,
                method,
                headers,
                data,
                form,
                file,
            };
            let destination = Destination {
                output,
                remote_name,
                include,
            };
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(cmd_fetch(config, &offer, answer, request, destination))
        }

        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

struct RequestArgs {
    target: String,
    method: String,
    headers: Vec<String>,
    data: Option<String>,
    form: Vec<String>,
    file: Vec<String>,
}

struct Destination {
    output: Option<PathBuf>,
    remote_name: bool,
    include: bool,
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// File config (explicit path, else the default location if present),
/// overridden by the environment.
fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let file_config = match path {
        Some(path) => Config::from_file(path)?,
        None => match Config::default_path() {
            Some(path) if path.exists() => Config::from_file(path)?,
            _ => Config::default(),
        },
    };
    let config = file_config.merge(Config::from_env());
    config.transport.validate()?;
    Ok(config)
}

async fn cmd_fetch(
    config: Config,
    offer: &str,
    answer_path: Option<PathBuf>,
    args: RequestArgs,
    destination: Destination,
) -> anyhow::Result<()> {
    let offer = read_offer(offer)?;
    let (request, target) = build_request(args).await?;

    let session = PeerSession::connect_rtc(&config).await?;
    let negotiation = session.answer_offer(offer);

    let answer = negotiation.answer.wait().await?;
    let answer_json = answer.to_json()?;
    match &answer_path {
        Some(path) => {
            tokio::fs::write(path, answer_json.as_bytes())
                .await
                .with_context(|| format!("Failed to write answer to {}", path.display()))?;
            tracing::info!(path = %path.display(), "Answer written");
        }
        None => {
            eprintln!("Send this answer to the peer:");
            eprintln!("{answer_json}");
        }
    }

    let transport = negotiation.established.wait().await?;
    tracing::info!(request = %request.summary(), "Fetching");

    let received = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let observer = {
        let received = received.clone();
        Arc::new(move |progress: Progress| match progress {
            Progress::Total(total) => tracing::debug!(total, "Body length"),
            Progress::Received(n) => {
                let so_far =
                    received.fetch_add(n as u64, std::sync::atomic::Ordering::Relaxed) + n as u64;
                tracing::trace!(received = so_far, "Body progress");
            }
            Progress::Done => tracing::debug!("Body complete"),
        })
    };
    let response = transport.fetch_with_progress(request, observer).await?;

    if destination.include {
        eprintln!("HTTP/1.1 {} {}", response.status().as_u16(), response.status_text());
        for (name, value) in response.headers().iter() {
            eprintln!("{name}: {value}");
        }
        eprintln!();
    }
    if !response.ok() {
        tracing::warn!(status = response.status().as_u16(), "Peer returned an error status");
    }

    let output = match (destination.output, destination.remote_name) {
        (Some(path), _) => Some(path),
        (None, true) => Some(PathBuf::from(remote_file_name(&response, &target))),
        (None, false) => None,
    };
    let written = write_body(response, output.as_deref()).await?;
    tracing::info!(bytes = written, "Done");
    Ok(())
}

fn read_offer(source: &str) -> anyhow::Result<SessionDescription> {
    let json = if source == "-" {
        eprintln!("Paste the offer JSON, then end input (Ctrl-D):");
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("Failed to read offer {source}"))?
    };
    Ok(SessionDescription::offer_from_json(&json)?)
}

/// The request, plus its target for naming downloads.
async fn build_request(args: RequestArgs) -> anyhow::Result<(Request, String)> {
    let method = http::Method::from_bytes(args.method.to_uppercase().as_bytes())
        .map_err(|_| anyhow::anyhow!("Invalid method: {}", args.method))?;

    let mut builder = Request::builder(method, args.target.clone());
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Invalid header (expected `Name: value`): {header}"))?;
        builder = builder.header(name.trim(), value.trim());
    }

    if let Some(data) = args.data {
        builder = builder.body(Body::Text(data));
    } else if !args.form.is_empty() || !args.file.is_empty() {
        let mut form = Form::new();
        for field in &args.form {
            let (name, value) = split_field(field)?;
            form = form.text(name, value);
        }
        for field in &args.file {
            let (name, path) = split_field(field)?;
            let path = path.strip_prefix('@').unwrap_or(path);
            let part = FilePart::open(path)
                .await
                .with_context(|| format!("Failed to open {path}"))?;
            form = form.file(name, part);
        }
        builder = builder.multipart(form);
    }

    Ok((builder.build(), args.target))
}

fn split_field(field: &str) -> anyhow::Result<(&str, &str)> {
    field
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Invalid field (expected `name=value`): {field}"))
}

/// Attachment file name, else the last path segment of the target.
fn remote_file_name(response: &Response, target: &str) -> String {
    if let Some(name) = response.attachment_filename() {
        return sanitize_file_name(&name);
    }
    let path = url::Url::parse(target)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| target.split(['?', '#']).next().unwrap_or_default().to_string());
    let name = path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("index.html");
    sanitize_file_name(name)
}

fn sanitize_file_name(name: &str) -> String {
    let name = name.rsplit(['/', '\\']).next().unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." {
        "download".to_string()
    } else {
        name.to_string()
    }
}

async fn write_body(mut response: Response, output: Option<&Path>) -> anyhow::Result<u64> {
    let mut sink: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await {
        let chunk = chunk?;
        sink.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    sink.flush().await?;
    Ok(written)
}
