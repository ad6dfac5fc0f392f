//! `usb-serial-bridge`: drive one USB serial session over stdio.
//!
//! Each stdin line is a JSON method call, e.g.
//! `{"method": "setPortParameters", "arguments": {"baudRate": 9600, "dataBits": 8, "stopBits": 1, "parity": 0}}`.
//! Stdout carries one JSON object per line: `result` lines answering calls,
//! and `data`, `error` and `end_of_stream` lines from the event stream.
//! Logs go to stderr.

use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, error, info, warn};
use usb_serial_bridge::config::ConfigLoader;
use usb_serial_bridge::logging::init_logging;
use usb_serial_bridge::{
    BridgeError, DeliveryContext, EventSink, LineParameters, MethodCall, MethodResult, MockDriver,
    SessionOptions, SessionRegistry, SystemSerialDriver,
};

#[derive(Parser, Debug)]
#[command(
    name = "usb-serial-bridge",
    version,
    about = "Expose a USB serial port as a JSON command surface and byte event stream on stdio."
)]
struct Args {
    /// Device path or a configured port alias.
    #[arg(required_unless_present = "loopback")]
    port: Option<String>,

    /// Baud rate applied at open, before any setPortParameters call.
    #[arg(short, long)]
    baud: Option<u32>,

    /// Interface id used to name the session channels.
    #[arg(long, default_value_t = 0)]
    interface_id: u32,

    /// Use an in-memory loopback device instead of real hardware.
    #[arg(long)]
    loopback: bool,

    /// Explicit config file path.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

/// One stdin line. `channel` defaults to the session's method channel.
#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    channel: Option<String>,
    #[serde(flatten)]
    call: MethodCall,
}

/// Prints every event as a JSON line.
struct StdoutSink {
    interface_id: u32,
}

impl StdoutSink {
    fn event(&self, kind: &str, extra: Value) {
        let mut line = json!({
            "type": kind,
            "interface": self.interface_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let (Some(obj), Value::Object(extra)) = (line.as_object_mut(), extra) {
            obj.extend(extra);
        }
        emit(&line);
    }
}

impl EventSink for StdoutSink {
    fn on_data(&self, data: &[u8]) {
        self.event("data", json!({ "data": data }));
    }

    fn on_error(&self, code: &str, message: &str) {
        self.event("error", json!({ "code": code, "message": message }));
    }

    fn on_end_of_stream(&self) {
        self.event("end_of_stream", Value::Null);
    }
}

fn emit(line: &Value) {
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{line}").and_then(|_| stdout.flush()) {
        warn!(error = %e, "failed to write to stdout");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let config_path = loader.config_path.clone();
    let config = loader.into_config();

    if let Err(e) = init_logging(&config.logging, args.verbose) {
        eprintln!("logging disabled: {e}");
    }
    debug!(?config_path, "configuration loaded");

    let registry = Arc::new(SessionRegistry::new(
        DeliveryContext::current()?,
        SessionOptions::from(&config.serial),
    ));

    let parameters = LineParameters {
        baud_rate: args.baud.unwrap_or(config.serial.default_baud),
        ..LineParameters::default()
    };
    let session = match args.port.as_deref() {
        Some(port) if !args.loopback => {
            let device = config.serial.resolve_port(port);
            info!(device = %device, %parameters, "using serial device");
            registry.create(args.interface_id, SystemSerialDriver::new(device, parameters))?
        }
        _ => {
            info!("using loopback device");
            registry.create(args.interface_id, MockDriver::loopback("loopback"))?
        }
    };

    let sink: Arc<dyn EventSink> = Arc::new(StdoutSink {
        interface_id: args.interface_id,
    });
    session.subscribe(&sink);

    let default_channel = session.method_channel_name().to_string();
    info!(
        method_channel = %default_channel,
        event_channel = %session.event_channel_name(),
        "session ready"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    let result = handle_line(&registry, &default_channel, &line).await;
                    emit(&result);
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "stdin read failed");
                    break;
                }
            },
            _ = &mut shutdown => break,
        }
    }

    info!(metrics = ?session.metrics(), "shutting down");
    let registry = Arc::clone(&registry);
    if let Err(e) = tokio::task::spawn_blocking(move || registry.release_all()).await {
        error!(error = %e, "release task failed");
    }
    Ok(())
}

/// Run one request line. Commands block on the driver, so they run on the
/// blocking pool.
async fn handle_line(registry: &Arc<SessionRegistry>, default_channel: &str, line: &str) -> Value {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            let result = MethodResult::from(BridgeError::invalid_argument("request", e.to_string()));
            return json!({ "type": "result", "result": result });
        }
    };

    let method = request.call.method.clone();
    let channel = request
        .channel
        .unwrap_or_else(|| default_channel.to_string());
    let registry = Arc::clone(registry);
    let result = match tokio::task::spawn_blocking(move || registry.route(&channel, &request.call))
        .await
    {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, method = %method, "command task failed");
            MethodResult::Error {
                code: "Internal".to_string(),
                message: e.to_string(),
            }
        }
    };
    json!({ "type": "result", "method": method, "result": result })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("signal received, shutting down");
}
