//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Tracing subscriber bootstrap for bus hosts."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "R_EMS_COSIM_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Writer guards for the file and stdout appenders; dropping them loses
/// buffered lines, so they live for the whole process.
static GUARDS: OnceCell<[WorkerGuard; 2]> = OnceCell::new();

/// Available log formats for the bus host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Pick the filter directive: `R_EMS_COSIM_LOG`, then `RUST_LOG`, then `info`.
fn env_filter() -> (EnvFilter, &'static str) {
    if let Ok(directive) = std::env::var(LOG_ENV) {
        match EnvFilter::try_new(&directive) {
            Ok(filter) => return (filter, LOG_ENV),
            Err(err) => eprintln!(
                "invalid {LOG_ENV} directive {directive:?} ({err}); defaulting to {DEFAULT_DIRECTIVE}"
            ),
        }
    }
    match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, "RUST_LOG"),
        Err(_) => (EnvFilter::new(DEFAULT_DIRECTIVE), "default"),
    }
}

fn stdout_layer(format: LogFormat, writer: NonBlocking) -> BoxedLayer {
    let base = fmt::layer().with_timer(fmt::time::UtcTime::rfc_3339());
    match format {
        LogFormat::StructuredJson => base.with_target(false).json().with_writer(writer).boxed(),
        LogFormat::Pretty => base.with_target(true).with_writer(writer).boxed(),
    }
}

/// Install the global subscriber for a bus host.
///
/// Stdout carries JSON or pretty lines per [`LogFormat`]. A daily rolling
/// JSON file `<prefix>-<service>.log` under `config.directory` keeps every
/// transaction log of the run. Calling this again after a subscriber is set
/// only creates the directory.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let appender = daily(&config.directory, format!("{prefix}-{service_name}.log"));
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let (filter, filter_source) = env_filter();
    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();
    let installed = tracing_subscriber::registry()
        .with(vec![stdout_layer(config.format, stdout_writer), file_layer])
        .with(filter)
        .try_init()
        .is_ok();
    if !installed {
        return Ok(());
    }
    let _ = GUARDS.set([file_guard, stdout_guard]);

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        filter = filter_source,
        "tracing initialised"
    );
    Ok(())
}
