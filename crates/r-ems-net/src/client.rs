//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Control channel client driving the simulator over HTTP."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Client side of the simulator control channel.
//!
//! A [`ControlChannel`] owns one simulator session: it launches (or attaches
//! to) the simulator, waits for its clock to become readable, then exchanges
//! property values and steers the simulated clock. Transport failures never
//! surface as errors. They clear the `connected` flag, after which reads
//! return zeros and polls give up immediately.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDateTime;
use r_ems_common::config::{SimulatorBusConfig, StartupConfig};
use r_ems_common::time::parse_timestamp;
use r_ems_logging::debug::{noop, SharedDebugSink};
use r_ems_msg::{parse_complex, render_value, split_value_unit, ParamValue, ParameterSet};
use rand::Rng;
use reqwest::StatusCode;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::process::{
    install_exit_hooks, launch_args, requested_port, LaunchArgs, LaunchSpec, SimulatorProcess,
    PORT_FLAG,
};
use crate::protocol::{
    extract_value, get_path, pause_at_path, quiet_path, set_path, verbose_path, CLOCK_PATH,
    RESUME_PATH, SHUTDOWN_PATH,
};
use crate::ChannelError;

/// Lower bound of the pause after a failed launch.
const MIN_SPAWN_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle of a control channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Starting,
    Retry,
    Ready,
    Running,
    Closing,
}

/// One session with the simulator control server.
#[derive(Debug)]
pub struct ControlChannel {
    config: SimulatorBusConfig,
    folder: PathBuf,
    http: reqwest::Client,
    state: ChannelState,
    connected: bool,
    port: Option<u16>,
    process: Option<SimulatorProcess>,
    debug: SharedDebugSink,
    quiet: bool,
}

impl ControlChannel {
    /// Build a closed channel. `folder` is where the simulator runs and where
    /// its stdout and stderr files land.
    pub fn new(
        config: SimulatorBusConfig,
        folder: impl Into<PathBuf>,
    ) -> Result<Self, ChannelError> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            folder: folder.into(),
            http,
            state: ChannelState::Closed,
            connected: false,
            port: None,
            process: None,
            debug: noop(),
            quiet: false,
        })
    }

    /// Mirror raw traffic into a debug sink.
    pub fn with_debug(mut self, sink: SharedDebugSink) -> Self {
        self.debug = sink;
        self
    }

    /// Ask the simulator for quiet output once it is ready.
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Replace the simulator executable used by later launches.
    pub fn set_executable(&mut self, executable: impl Into<PathBuf>) {
        self.config.executable = executable.into();
    }

    pub fn executable(&self) -> &Path {
        &self.config.executable
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Port of the current session, once one was chosen.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Bring the simulator up paused at `start`.
    ///
    /// Returns whether the clock became readable. A `false` return leaves the
    /// channel closed and disconnected; callers keep going with zero outputs.
    pub async fn open(&mut self, start: NaiveDateTime, timezone: Option<&str>) -> bool {
        if self.state != ChannelState::Closed {
            warn!(state = ?self.state, "control channel already open");
            return self.connected;
        }
        self.state = ChannelState::Starting;
        let ready = if self.config.launch {
            self.launch(start, timezone).await
        } else {
            self.attach().await
        };
        if ready {
            self.mark_ready().await;
        } else {
            self.connected = false;
            self.state = ChannelState::Closed;
        }
        ready
    }

    async fn launch(&mut self, start: NaiveDateTime, timezone: Option<&str>) -> bool {
        install_exit_hooks();
        let startup = self.config.startup.clone();
        let first_port = requested_port(&self.config.gld_args).or(self.config.port);

        for attempt in 1..=startup.retries {
            let port = match first_port {
                Some(port) if attempt == 1 => port,
                _ => random_port(startup.port_min, startup.port_max),
            };
            let spec = LaunchSpec {
                executable: self.config.executable.clone(),
                model: self.config.filename.clone(),
                args: attempt_args(&self.config, start, timezone, port),
                folder: self.folder.clone(),
            };
            self.trace(&spec.command_line(), "launch");

            let process = match SimulatorProcess::spawn(&spec) {
                Ok(process) => process,
                Err(err) => {
                    warn!(attempt, error = %err, "simulator launch failed");
                    self.state = ChannelState::Retry;
                    sleep(spawn_backoff(startup.spawn_backoff)).await;
                    continue;
                }
            };
            sleep(startup.check_delay).await;
            if let Some(status) = process.try_exit_status() {
                warn!(attempt, port, %status, "simulator exited during start-up");
                self.state = ChannelState::Retry;
                sleep(spawn_backoff(startup.spawn_backoff)).await;
                continue;
            }

            self.port = Some(port);
            self.process = Some(process);
            if self.wait_until_ready(&startup).await {
                info!(attempt, port, pid = self.pid(), "simulator ready");
                return true;
            }

            warn!(attempt, port, "simulator not ready in time; restarting");
            if let Some(process) = self.process.take() {
                process.kill();
            }
            self.port = None;
            self.state = ChannelState::Retry;
            sleep(timeout_backoff(startup.loop_pause)).await;
        }

        warn!(
            retries = startup.retries,
            model = %self.config.filename.display(),
            "simulator failed to start; outputs will read as zero"
        );
        false
    }

    async fn attach(&mut self) -> bool {
        let Some(port) = requested_port(&self.config.gld_args).or(self.config.port) else {
            warn!("attaching to a running simulator requires a port");
            return false;
        };
        self.port = Some(port);
        let startup = self.config.startup.clone();
        if self.wait_until_ready(&startup).await {
            info!(host = %self.config.host, port, "attached to running simulator");
            true
        } else {
            warn!(
                host = %self.config.host,
                port,
                "simulator did not answer; outputs will read as zero"
            );
            self.port = None;
            false
        }
    }

    /// Poll the clock until it parses, the child dies or the start-up timeout
    /// passes.
    async fn wait_until_ready(&mut self, startup: &StartupConfig) -> bool {
        let deadline = Instant::now() + startup.timeout;
        loop {
            let exited = self
                .process
                .as_ref()
                .and_then(SimulatorProcess::try_exit_status);
            if let Some(status) = exited {
                warn!(%status, "simulator exited before becoming ready");
                return false;
            }
            match self.fetch(CLOCK_PATH).await {
                Ok((_, body)) => {
                    let clock = extract_value(&body);
                    if parse_timestamp(&clock).is_some() {
                        return true;
                    }
                    debug!(clock = %clock, "simulator clock not ready");
                }
                Err(err) => debug!(error = %err, "simulator not answering yet"),
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(startup.loop_pause).await;
        }
    }

    async fn mark_ready(&mut self) {
        self.connected = true;
        self.state = ChannelState::Ready;
        self.request(&verbose_path(false)).await;
        if self.quiet {
            self.request(&quiet_path(true)).await;
        }
    }

    fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(SimulatorProcess::pid)
    }

    async fn fetch(&self, path: &str) -> Result<(StatusCode, String), reqwest::Error> {
        let port = self.port.unwrap_or_default();
        let url = format!("http://{}:{port}{path}", self.config.host);
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// Issue one request and return its body.
    ///
    /// Transport failures disconnect the channel and yield an empty body.
    /// Error statuses yield an empty body but keep the channel connected.
    async fn request(&mut self, path: &str) -> String {
        self.trace(path, "RAW SEND");
        match self.fetch(path).await {
            Ok((status, body)) => {
                self.trace(&body, "RAW RECV");
                if status.is_success() {
                    body
                } else {
                    warn!(%status, path, "simulator rejected request");
                    String::new()
                }
            }
            Err(err) => {
                if self.connected {
                    warn!(path, error = %err, "control channel lost; further reads return zero");
                }
                self.connected = false;
                String::new()
            }
        }
    }

    fn trace(&self, message: &str, label: &str) {
        self.debug.lock().write(message, label);
    }

    /// Write every non-null parameter to the simulator.
    pub async fn send(&mut self, params: &ParameterSet) {
        if !self.connected {
            debug!(count = params.len(), "control channel disconnected; inputs dropped");
            return;
        }
        for param in params.iter() {
            if param.value.is_null() {
                debug!(param = %param.id(), "skipping null input");
                continue;
            }
            let path = set_path(
                &param.object,
                param.property.as_deref(),
                &render_value(&param.value),
                param.unit.as_deref(),
            );
            self.request(&path).await;
        }
    }

    /// Read every requested parameter back.
    ///
    /// Values arrive as complex numbers; text that does not parse is passed
    /// through as text. A disconnected channel yields zeros.
    pub async fn recv(&mut self, requested: &ParameterSet) -> ParameterSet {
        if !self.connected {
            return requested.zeroed();
        }
        let mut received = requested.zeroed();
        for param in requested.iter() {
            let body = self
                .request(&get_path(&param.object, param.property.as_deref()))
                .await;
            if !self.connected {
                // The rest stay zero; each further request would wait out the timeout.
                break;
            }
            let (value, unit) = decode_value(&body);
            if value.is_null() {
                debug!(param = %param.id(), "simulator returned no value");
            }
            if let Some(result) = received.find_mut(&param.object, param.property.as_deref()) {
                result.set_value(value);
                if unit.is_some() {
                    result.unit = unit;
                }
            }
        }
        received
    }

    /// Ask the simulator to run up to `ts` and pause. Arrival is not awaited.
    pub async fn run_to_time(&mut self, ts: NaiveDateTime, timezone: Option<&str>) {
        if !self.connected {
            debug!(target_time = %ts, "control channel disconnected; not advancing");
            return;
        }
        self.state = ChannelState::Running;
        self.request(&pause_at_path(ts, timezone)).await;
    }

    /// Current simulator clock, if it is readable.
    pub async fn clock(&mut self) -> Option<NaiveDateTime> {
        let body = self.request(CLOCK_PATH).await;
        parse_timestamp(&extract_value(&body))
    }

    /// Poll the clock until it reaches `target`.
    ///
    /// Gives up when the channel disconnects or, if configured, after
    /// `poll_timeout`. Returns whether `target` was reached.
    pub async fn poll_until_reached(&mut self, target: NaiveDateTime) -> bool {
        let started = Instant::now();
        loop {
            if !self.connected {
                debug!(target_time = %target, "control channel disconnected; poll abandoned");
                return false;
            }
            if let Some(clock) = self.clock().await {
                if clock >= target {
                    return true;
                }
            }
            if let Some(limit) = self.config.poll_timeout {
                if started.elapsed() >= limit {
                    warn!(
                        target_time = %target,
                        timeout_secs = limit.as_secs_f64(),
                        "simulator clock did not reach target"
                    );
                    return false;
                }
            }
            sleep(self.config.poll).await;
        }
    }

    /// End the session.
    ///
    /// With `resume` the simulator runs on unattended, otherwise it is asked
    /// to stop. Either way the child is awaited for up to the configured
    /// shutdown timeout and killed afterwards. Closing twice only warns.
    pub async fn shutdown(&mut self, resume: bool) {
        if self.state == ChannelState::Closed {
            warn!("control channel already closed");
            return;
        }
        self.state = ChannelState::Closing;
        if self.connected {
            let path = if resume { RESUME_PATH } else { SHUTDOWN_PATH };
            self.request(path).await;
        }
        if let Some(process) = self.process.take() {
            let status = process
                .wait_for_exit(self.config.startup.shutdown_timeout, self.config.poll)
                .await;
            match status {
                Some(status) => info!(pid = process.pid(), %status, "simulator exited"),
                None => debug!(pid = process.pid(), "simulator killed at shutdown"),
            }
        }
        self.connected = false;
        self.state = ChannelState::Closed;
    }
}

/// Decode a property response into a value and an optional unit.
fn decode_value(body: &str) -> (ParamValue, Option<String>) {
    let text = extract_value(body);
    if text.is_empty() {
        return (ParamValue::Null, None);
    }
    let (token, unit) = split_value_unit(&text);
    match parse_complex(token) {
        Ok(z) => (ParamValue::Complex(z), unit.map(str::to_owned)),
        Err(err) => {
            debug!(value = %text, error = %err, "non-numeric property value kept as text");
            (ParamValue::Text(text.clone()), None)
        }
    }
}

fn random_port(min: u16, max: u16) -> u16 {
    if min >= max {
        return min;
    }
    rand::thread_rng().gen_range(min..max)
}

fn spawn_backoff(ceiling: Duration) -> Duration {
    let floor = MIN_SPAWN_BACKOFF.min(ceiling);
    if floor >= ceiling {
        return ceiling;
    }
    rand::thread_rng().gen_range(floor..ceiling)
}

fn timeout_backoff(loop_pause: Duration) -> Duration {
    loop_pause.mul_f64(rand::thread_rng().gen_range(5.0..10.0))
}

/// Arguments of a launch attempt on `port`, for callers that want to show
/// the command before opening.
pub fn attempt_args(
    config: &SimulatorBusConfig,
    start: NaiveDateTime,
    timezone: Option<&str>,
    port: u16,
) -> LaunchArgs {
    let mut extra = config.gld_args.clone();
    extra.shift_remove(PORT_FLAG);
    launch_args(start, timezone, Some(port), &extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeSimulator;
    use indexmap::IndexMap;
    use r_ems_msg::{Complex64, Parameter};

    fn start() -> NaiveDateTime {
        parse_timestamp("2020-06-01 00:00:00").unwrap()
    }

    fn config(port: Option<u16>) -> SimulatorBusConfig {
        SimulatorBusConfig {
            filename: PathBuf::from("model.glm"),
            host: "127.0.0.1".to_owned(),
            port,
            gld_args: IndexMap::new(),
            poll: Duration::from_millis(10),
            executable: PathBuf::from("gridlabd"),
            launch: false,
            startup: StartupConfig {
                retries: 2,
                timeout: Duration::from_millis(500),
                check_delay: Duration::from_millis(50),
                loop_pause: Duration::from_millis(20),
                shutdown_timeout: Duration::from_millis(300),
                spawn_backoff: Duration::from_millis(20),
                port_min: 40_000,
                port_max: 41_000,
            },
            request_timeout: Duration::from_secs(2),
            poll_timeout: Some(Duration::from_millis(300)),
        }
    }

    async fn free_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn attached_channel_exchanges_values_and_steers_clock() {
        let fake = FakeSimulator::spawn().await.unwrap();
        fake.set_clock(start(), Some("EST"));
        fake.set_property("node_1", Some("voltage_A"), "+7199.56-4156.66j V");
        let dir = tempfile::tempdir().unwrap();

        let mut channel = ControlChannel::new(config(Some(fake.port())), dir.path())
            .unwrap()
            .with_quiet(true);
        assert!(channel.open(start(), Some("EST")).await);
        assert!(channel.is_connected());
        assert_eq!(channel.state(), ChannelState::Ready);
        let requests = fake.requests();
        assert!(requests.contains(&"/xml/verbose=FALSE".to_owned()));
        assert!(requests.contains(&"/xml/quiet=TRUE".to_owned()));

        let mut inputs = ParameterSet::new();
        inputs.add(
            Parameter::new("load_1", Some("constant_power_A"), Complex64::new(1000.0, 250.0))
                .with_unit("VA"),
        );
        inputs.add(Parameter::request("skipped", Some("x")));
        channel.send(&inputs).await;
        assert_eq!(
            fake.property("load_1", Some("constant_power_A")).as_deref(),
            Some("1000+250j VA")
        );
        assert!(fake.property("skipped", Some("x")).is_none());

        let mut requested = ParameterSet::new();
        requested.add(Parameter::request("node_1", Some("voltage_A")));
        requested.add(Parameter::request("missing", Some("x")));
        let outputs = channel.recv(&requested).await;
        let voltage = outputs.get("node_1", Some("voltage_A")).unwrap();
        assert_eq!(voltage.value, ParamValue::Complex(Complex64::new(7199.56, -4156.66)));
        assert_eq!(voltage.unit.as_deref(), Some("V"));
        assert!(outputs.get("missing", Some("x")).unwrap().value.is_null());
        assert!(channel.is_connected());

        let later = parse_timestamp("2020-06-01 00:00:10").unwrap();
        channel.run_to_time(later, Some("EST")).await;
        assert_eq!(channel.state(), ChannelState::Running);
        assert!(channel.poll_until_reached(later).await);
        assert_eq!(channel.clock().await, Some(later));

        channel.shutdown(false).await;
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(!channel.is_connected());
        assert!(fake.requests().contains(&SHUTDOWN_PATH.to_owned()));
        channel.shutdown(false).await;
        fake.shutdown().await;
    }

    #[tokio::test]
    async fn unreachable_simulator_degrades_to_zero_outputs() {
        let port = free_port().await;
        let mut cfg = config(Some(port));
        cfg.startup.timeout = Duration::from_millis(100);
        let dir = tempfile::tempdir().unwrap();
        let mut channel = ControlChannel::new(cfg, dir.path()).unwrap();

        assert!(!channel.open(start(), None).await);
        assert!(!channel.is_connected());
        assert_eq!(channel.state(), ChannelState::Closed);

        let mut requested = ParameterSet::new();
        requested.add(Parameter::request("meter", Some("measured_power")).with_unit("W"));
        let outputs = channel.recv(&requested).await;
        let power = outputs.get("meter", Some("measured_power")).unwrap();
        assert_eq!(power.value, ParamValue::zero());
        assert_eq!(power.unit.as_deref(), Some("W"));
        assert!(!channel.poll_until_reached(start()).await);
        channel.send(&requested).await;
    }

    #[tokio::test]
    async fn attach_without_port_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = ControlChannel::new(config(None), dir.path()).unwrap();
        assert!(!channel.open(start(), None).await);
        assert_eq!(channel.port(), None);
    }

    #[tokio::test]
    async fn server_loss_disconnects_and_zeroes_reads() {
        let fake = FakeSimulator::spawn().await.unwrap();
        fake.set_clock(start(), None);
        fake.set_property("meter", Some("measured_power"), "+1500 W");
        let dir = tempfile::tempdir().unwrap();
        let mut channel = ControlChannel::new(config(Some(fake.port())), dir.path()).unwrap();
        assert!(channel.open(start(), None).await);

        let mut requested = ParameterSet::new();
        requested.add(Parameter::request("meter", Some("measured_power")));
        let before = channel.recv(&requested).await;
        assert_eq!(
            before.get("meter", Some("measured_power")).unwrap().value.as_real(),
            Some(1500.0)
        );

        fake.shutdown().await;
        let after = channel.recv(&requested).await;
        assert!(!channel.is_connected());
        assert_eq!(
            after.get("meter", Some("measured_power")).unwrap().value,
            ParamValue::zero()
        );
    }

    #[tokio::test]
    async fn read_timeout_skips_remaining_requests() {
        let fake = FakeSimulator::spawn().await.unwrap();
        fake.set_clock(start(), None);
        let dir = tempfile::tempdir().unwrap();
        let mut settings = config(Some(fake.port()));
        settings.request_timeout = Duration::from_millis(200);
        let mut channel = ControlChannel::new(settings, dir.path()).unwrap();
        assert!(channel.open(start(), None).await);

        let mut requested = ParameterSet::new();
        for meter in ["meter_1", "meter_2", "meter_3"] {
            fake.set_property(meter, Some("measured_power"), "10 W");
            requested.add(Parameter::request(meter, Some("measured_power")));
        }
        fake.delay_reads(Some(Duration::from_millis(800)));
        let out = channel.recv(&requested).await;

        assert!(!channel.is_connected());
        assert_eq!(out.len(), 3);
        for param in out.iter() {
            assert_eq!(param.value, ParamValue::zero(), "{param}");
        }
        let reads: Vec<String> = fake
            .requests()
            .into_iter()
            .filter(|path| path.starts_with("/meter_"))
            .collect();
        assert_eq!(reads, vec!["/meter_1/measured_power".to_owned()]);
        fake.shutdown().await;
    }

    #[tokio::test]
    async fn frozen_clock_stops_polling_at_timeout() {
        let fake = FakeSimulator::spawn().await.unwrap();
        fake.set_clock(start(), None);
        fake.freeze_clock(true);
        let dir = tempfile::tempdir().unwrap();
        let mut channel = ControlChannel::new(config(Some(fake.port())), dir.path()).unwrap();
        assert!(channel.open(start(), None).await);

        let later = parse_timestamp("2020-06-01 00:01:00").unwrap();
        channel.run_to_time(later, None).await;
        assert!(!channel.poll_until_reached(later).await);
        assert!(channel.is_connected());
        channel.shutdown(true).await;
        assert!(fake.requests().contains(&RESUME_PATH.to_owned()));
        fake.shutdown().await;
    }

    #[test]
    fn text_values_pass_through() {
        assert_eq!(
            decode_value("<property><value>CLOSED</value></property>"),
            (ParamValue::Text("CLOSED".to_owned()), None)
        );
        assert_eq!(
            decode_value("+120.5 kW"),
            (ParamValue::Complex(Complex64::new(120.5, 0.0)), Some("kW".to_owned()))
        );
        assert_eq!(decode_value(""), (ParamValue::Null, None));
    }

    #[test]
    fn attempt_args_place_port_before_extras() {
        let mut cfg = config(None);
        cfg.gld_args.insert("-P".to_owned(), Some("6267".to_owned()));
        cfg.gld_args.insert("--warn".to_owned(), None);
        let args = attempt_args(&cfg, start(), None, 31_000);
        let keys: Vec<&str> = args.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["--server", "--verbose", "-D", "-P", "--warn"]);
        assert_eq!(args.get("-P"), Some(&Some("31000".to_owned())));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launched_simulator_receives_arguments_and_is_stopped() {
        let fake = FakeSimulator::spawn().await.unwrap();
        fake.set_clock(start(), None);
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake_sim.sh");
        std::fs::write(&script, "echo \"$@\" > args.txt\nexec sleep 30\n").unwrap();

        let mut cfg = config(None);
        cfg.launch = true;
        cfg.executable = PathBuf::from("/bin/sh");
        cfg.filename = script;
        cfg.gld_args
            .insert(PORT_FLAG.to_owned(), Some(fake.port().to_string()));
        let mut channel = ControlChannel::new(cfg, dir.path()).unwrap();

        assert!(channel.open(start(), None).await);
        assert_eq!(channel.port(), Some(fake.port()));
        assert!(channel.pid().is_some());
        let args_file = dir.path().join("args.txt");
        for _ in 0..50 {
            if args_file.exists() {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        let args = std::fs::read_to_string(&args_file).unwrap();
        assert!(args.starts_with("--server --verbose -D pauseat="), "{args}");
        assert!(args.contains(&format!("-P {}", fake.port())), "{args}");
        assert!(dir.path().join(crate::process::STDOUT_FILE).exists());
        assert!(dir.path().join(crate::process::STDERR_FILE).exists());

        channel.shutdown(false).await;
        assert!(channel.process.is_none());
        assert_eq!(channel.state(), ChannelState::Closed);
        fake.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crashing_simulator_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("crash.sh");
        std::fs::write(&script, "exit 1\n").unwrap();
        let mut cfg = config(None);
        cfg.launch = true;
        cfg.executable = PathBuf::from("/bin/sh");
        cfg.filename = script;
        let mut channel = ControlChannel::new(cfg, dir.path()).unwrap();

        assert!(!channel.open(start(), None).await);
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(channel.process.is_none());
    }
}
