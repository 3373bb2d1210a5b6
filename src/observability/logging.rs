use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Characters of a user id left readable at each end in log output.
pub const USER_ID_VISIBLE_CHARS: usize = 2;

/// Dependencies that are chatty at `info`; `RUST_LOG` still overrides them.
const QUIET_TARGETS: &[&str] = &["sqlx=warn", "redis=warn", "hyper=warn"];

/// Configuration for logging.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
    pub include_file: bool,
    pub include_line: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
            include_file: false,
            include_line: false,
        }
    }
}

impl LogConfig {
    /// Filter used when `RUST_LOG` is unset: `level` for everything except
    /// the quiet targets.
    pub fn default_directives(&self) -> String {
        std::iter::once(self.level.as_str())
            .chain(QUIET_TARGETS.iter().copied())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl From<&str> for LogFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Installs the global subscriber. Returns `false` if one was already set,
/// which happens when several tests share a process.
pub fn init_logging(config: &LogConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));

    // Exactly one of these is `Some`.
    let json = (config.format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(config.include_target)
            .with_file(config.include_file)
            .with_line_number(config.include_line)
            .with_span_events(FmtSpan::CLOSE)
    });
    let compact = (config.format == LogFormat::Compact).then(|| {
        fmt::layer()
            .compact()
            .with_target(config.include_target)
            .with_file(config.include_file)
            .with_line_number(config.include_line)
    });
    let pretty = (config.format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .pretty()
            .with_target(config.include_target)
            .with_file(config.include_file)
            .with_line_number(config.include_line)
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(json)
        .with(compact)
        .with(pretty)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            "Logging initialized with level {} ({:?})",
            config.level,
            config.format
        );
    }
    installed
}

/// Masks identifiers in log output, keeping `visible_chars` at each end.
pub fn mask_sensitive(value: &str, visible_chars: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= visible_chars * 2 {
        return "*".repeat(chars.len());
    }

    let prefix: String = chars[..visible_chars].iter().collect();
    let suffix: String = chars[chars.len() - visible_chars..].iter().collect();
    let masked_len = chars.len() - (visible_chars * 2);

    format!("{}{}{}", prefix, "*".repeat(masked_len), suffix)
}

/// How user ids appear in coordinator and handler logs.
pub fn mask_user_id(user_id: &str) -> String {
    mask_sensitive(user_id, USER_ID_VISIBLE_CHARS)
}
