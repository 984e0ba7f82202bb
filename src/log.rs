use serde::Deserialize;
use tracing_subscriber::{fmt::Subscriber, EnvFilter};

#[derive(Deserialize)]
#[serde(tag = "type")]
pub enum LogType {
    Stdout,
    Stderr,
}

#[derive(Deserialize)]
pub struct Log {
    pub level: String,
    pub structured: bool,
    pub backend: LogType,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: "info".into(),
            structured: false,
            backend: LogType::Stdout,
        }
    }
}

/// setup log from an optional environment filter and the config file
///
/// if the environment filter is present, then the config level is not used
pub fn setup(
    env_filter: Result<EnvFilter, tracing_subscriber::filter::FromEnvError>,
    config: Option<&Log>,
) -> anyhow::Result<()> {
    let default_log = Log::default();
    let config = config.unwrap_or(&default_log);
    let env_filter = match env_filter {
        Ok(env_filter) => env_filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    let builder = Subscriber::builder()
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
        .with_level(true)
        .with_env_filter(env_filter);

    match (&config.backend, config.structured) {
        (LogType::Stdout, false) => {
            tracing::subscriber::set_global_default(builder.with_ansi(true).finish())?
        }
        (LogType::Stdout, true) => {
            tracing::subscriber::set_global_default(builder.json().finish())?
        }
        (LogType::Stderr, false) => tracing::subscriber::set_global_default(
            builder
                .with_ansi(false)
                .with_writer(std::io::stderr)
                .finish(),
        )?,
        (LogType::Stderr, true) => tracing::subscriber::set_global_default(
            builder.json().with_writer(std::io::stderr).finish(),
        )?,
    };
    Ok(())
}
