//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "test"
//! ems_description: "In-process stand-in for the simulator control server."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Minimal HTTP server speaking the simulator control protocol, for tests.
//!
//! Set requests store values, get requests serve them back as XML, the
//! clock follows `pauseat` requests, and every raw request path is kept for
//! inspection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use r_ems_common::time::{format_timestamp, parse_timestamp};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Default)]
struct FakeState {
    clock: Mutex<Option<NaiveDateTime>>,
    timezone: Mutex<Option<String>>,
    properties: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<String>>,
    frozen: Mutex<bool>,
    read_delay: Mutex<Option<Duration>>,
}

/// Running fake simulator bound to `127.0.0.1`.
pub struct FakeSimulator {
    address: SocketAddr,
    state: Arc<FakeState>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl FakeSimulator {
    /// Bind an ephemeral port and start serving.
    pub async fn spawn() -> std::io::Result<Self> {
        Self::spawn_on(SocketAddr::from(([127, 0, 0, 1], 0))).await
    }

    pub async fn spawn_on(listen: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        let address = listener.local_addr()?;
        info!(address = %address, "fake simulator listening");
        let state = Arc::new(FakeState::default());
        let router = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&state));

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "fake simulator exited with error");
            }
        });
        Ok(Self {
            address,
            state,
            shutdown,
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Make the clock readable. Until then the clock reports `INIT`.
    pub fn set_clock(&self, ts: NaiveDateTime, timezone: Option<&str>) {
        *self.state.clock.lock() = Some(ts);
        *self.state.timezone.lock() = timezone.map(str::to_owned);
    }

    pub fn clock(&self) -> Option<NaiveDateTime> {
        *self.state.clock.lock()
    }

    /// Ignore `pauseat` requests so the clock never advances.
    pub fn freeze_clock(&self, frozen: bool) {
        *self.state.frozen.lock() = frozen;
    }

    /// Hold every property read for `delay` before answering.
    pub fn delay_reads(&self, delay: Option<Duration>) {
        *self.state.read_delay.lock() = delay;
    }

    /// Serve `value` (optionally followed by a unit) for `object[/property]`.
    pub fn set_property(&self, object: &str, property: Option<&str>, value: &str) {
        self.state
            .properties
            .lock()
            .insert(key(object, property), value.to_owned());
    }

    pub fn property(&self, object: &str, property: Option<&str>) -> Option<String> {
        self.state.properties.lock().get(&key(object, property)).cloned()
    }

    /// Raw, still escaped, request paths in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "fake simulator task failed");
        }
    }
}

fn key(object: &str, property: Option<&str>) -> String {
    match property {
        Some(property) => format!("{object}/{property}"),
        None => object.to_owned(),
    }
}

async fn handle(State(state): State<Arc<FakeState>>, uri: Uri) -> Response {
    let raw = uri.path().to_owned();
    state.requests.lock().push(raw.clone());
    let decoded = percent_decode_str(&raw).decode_utf8_lossy().into_owned();
    let path = decoded.trim_start_matches('/');

    if path == "xml/clock" {
        let clock = *state.clock.lock();
        let rendered = match clock {
            Some(ts) => format_timestamp(ts, state.timezone.lock().as_deref()),
            None => "INIT".to_owned(),
        };
        return xml("globalvar", "clock", &rendered);
    }
    if let Some(target) = path.strip_prefix("control/pauseat=") {
        if !*state.frozen.lock() {
            if let Some(ts) = parse_timestamp(target) {
                *state.clock.lock() = Some(ts);
            }
        }
        return StatusCode::OK.into_response();
    }
    if path.starts_with("control/") || path.starts_with("xml/") {
        return StatusCode::OK.into_response();
    }
    if let Some((name, value)) = path.split_once('=') {
        state.properties.lock().insert(name.to_owned(), value.to_owned());
        return StatusCode::OK.into_response();
    }
    let delay = *state.read_delay.lock();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    match state.properties.lock().get(path) {
        Some(value) => xml("property", path, value),
        None => (StatusCode::NOT_FOUND, format!("<error>{path} not found</error>")).into_response(),
    }
}

fn xml(tag: &str, name: &str, value: &str) -> Response {
    let body = format!("<{tag}>\n\t<name>{name}</name>\n\t<value>{value}</value>\n</{tag}>\n");
    (StatusCode::OK, body).into_response()
}
