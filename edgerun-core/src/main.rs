//! Edgerun Server - minimal host shell around the runtime core.
//!
//! Initializes the runtime with the native platform adapter, loads the
//! requested model, binds the listen socket and parks. HTTP route handling
//! lives in a separate frontend crate; this binary exists so packagers have
//! a runnable artifact with stable exit codes:
//!
//!   0 success, 1 usage error, 2 model load failure, 3 bind failure
//!
//! Usage: edgerun-server --model <path> [--host 127.0.0.1] [--port 8090]
//!        [--threads N] [--context N] [--gpu-layers N] [--cors|--no-cors]
//!        [--verbose]

use edgerun_core::registry::providers::ServiceConfig;
use edgerun_core::{platform, Capability, Component};
use std::net::TcpListener;
use std::process::exit;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

struct ServerArgs {
    model: Option<String>,
    host: String,
    port: u16,
    threads: u32,
    context: u32,
    gpu_layers: u32,
    cors: bool,
    verbose: bool,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            model: None,
            host: "127.0.0.1".to_string(),
            port: 8090,
            threads: 0,
            context: 4096,
            gpu_layers: 0,
            cors: true,
            verbose: false,
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {program} --model <path> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --model <path>      Model file to load (required)");
    eprintln!("  --host <addr>       Listen address (default 127.0.0.1)");
    eprintln!("  --port <port>       Listen port (default 8090)");
    eprintln!("  --threads <n>       Inference threads (default auto)");
    eprintln!("  --context <n>       Context length (default 4096)");
    eprintln!("  --gpu-layers <n>    Layers to offload to GPU (default 0)");
    eprintln!("  --cors / --no-cors  Toggle CORS headers (default on)");
    eprintln!("  --verbose           Debug logging");
    eprintln!("  --help              Show this help");
}

fn parse_args(args: &[String]) -> Result<ServerArgs, String> {
    let mut parsed = ServerArgs::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        let mut value_for = |name: &str| -> Result<String, String> {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{name} requires a value"))
        };
        match arg.as_str() {
            "--model" => parsed.model = Some(value_for("--model")?),
            "--host" => parsed.host = value_for("--host")?,
            "--port" => {
                parsed.port = value_for("--port")?
                    .parse()
                    .map_err(|_| "invalid --port value".to_string())?
            }
            "--threads" => {
                parsed.threads = value_for("--threads")?
                    .parse()
                    .map_err(|_| "invalid --threads value".to_string())?
            }
            "--context" => {
                parsed.context = value_for("--context")?
                    .parse()
                    .map_err(|_| "invalid --context value".to_string())?
            }
            "--gpu-layers" => {
                parsed.gpu_layers = value_for("--gpu-layers")?
                    .parse()
                    .map_err(|_| "invalid --gpu-layers value".to_string())?
            }
            "--cors" => parsed.cors = true,
            "--no-cors" => parsed.cors = false,
            "--verbose" => parsed.verbose = true,
            "--help" | "-h" => return Err(String::new()),
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    if parsed.model.is_none() {
        return Err("--model is required".to_string());
    }
    Ok(parsed)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let parsed = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("error: {message}");
                eprintln!();
            }
            print_usage(&args[0]);
            exit(if message.is_empty() { 0 } else { 1 });
        }
    };

    let filter = if parsed.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    platform::ensure_native();
    edgerun_core::init();

    let model = parsed.model.expect("checked in parse_args");
    info!("edgerun-server starting");
    info!("  model: {model}");
    info!("  listen: {}:{}", parsed.host, parsed.port);
    info!("  cors: {}", parsed.cors);

    let (component, _handle) = Component::create(Capability::TextGeneration);
    let config = ServiceConfig {
        context_length: parsed.context,
        threads: parsed.threads,
        gpu_layers: parsed.gpu_layers,
        ..Default::default()
    };
    if let Err(err) = component.load(&model, None, &config) {
        error!("model load failed: {err}");
        exit(2);
    }
    info!("model loaded");

    let listener = match TcpListener::bind((parsed.host.as_str(), parsed.port)) {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}:{}: {err}", parsed.host, parsed.port);
            exit(3);
        }
    };
    info!("listening on {}:{}", parsed.host, parsed.port);

    // Route handling lives in the HTTP frontend; hold the socket and park so
    // supervisors see a healthy long-running process.
    for stream in listener.incoming() {
        match stream {
            Ok(_) => {
                // Accept-and-close until the frontend is wired in.
            }
            Err(err) => {
                error!("accept failed: {err}");
            }
        }
    }
}
