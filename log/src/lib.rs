//! Logging setup for weft with file output and optional stdout.
//!
//! Logs always go to a file at `warn` level unless an env filter is set.
//! Stdout logging is enabled when `WEFT_LOG` or `RUST_LOG` is set, or in debug builds.
//!
//! ## Environment Variables
//!
//! 1. **`WEFT_LOG`** (highest priority) - weft-specific logging control
//! 2. **`RUST_LOG`** - Standard tracing environment variable
//! 3. **Default** - `warn` globally, `info` for weft crates
//!
//! `WEFT_LOG` accepts a bare level (`debug`), which applies to every weft
//! crate, or comma-separated `target=level` directives where the target may
//! be one of the short names in [`ALIASES`]:
//!
//! ```text
//! WEFT_LOG=host=trace,stack=debug
//! # warn,weft_runtime::host=trace,weft_model::stack=debug
//! ```
//!
//! ## Log File Location
//!
//! Default: `<data_local_dir>/weft/logs/weft-<pid>.log`
//! - macOS: `~/Library/Application Support/weft/logs/weft-12345.log`
//! - Linux: `~/.local/share/weft/logs/weft-12345.log`
//!
//! Override with `--log-file <path>`.

use std::{
    env,
    path::{Path, PathBuf},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

const CRATES: &[&str] = &["weft_model", "weft_runtime", "weft_bin"];

/// Short `WEFT_LOG` targets and the tracing targets they stand for.
pub const ALIASES: &[(&str, &str)] = &[
    ("model", "weft_model"),
    ("bus", "weft_model::bus"),
    ("companion", "weft_model::companion"),
    ("stack", "weft_model::stack"),
    ("runtime", "weft_runtime"),
    ("session", "weft_runtime::session"),
    ("host", "weft_runtime::host"),
    ("styles", "weft_runtime::styles"),
    ("server", "weft_runtime::server"),
    ("bin", "weft_bin"),
];

/// Returned from [`init`]; must be held alive to ensure log file flushing.
pub struct LogGuard {
    _file_guard: WorkerGuard,
    pub log_file: PathBuf,
}

#[derive(Debug, Default)]
pub struct LogConfig {
    pub log_file_path: Option<PathBuf>,
}

/// Initialize logging.
///
/// Filter priority follows the module docs: [`WEFT_LOG`] > [`RUST_LOG`] > defaults.
///
/// The returned [`LogGuard`] must be held for the lifetime of the program --
/// dropping it flushes and stops the background file writer.
pub fn init(config: LogConfig) -> Result<LogGuard, Box<dyn std::error::Error + Send + Sync>> {
    let (log_dir, filename) = resolve_log_path(config.log_file_path);

    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::never(&log_dir, &filename);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_filter(create_file_filter());

    let stdout_enabled =
        env::var("WEFT_LOG").is_ok() || env::var("RUST_LOG").is_ok() || cfg!(debug_assertions);

    let stdout_layer = if stdout_enabled {
        Some(fmt::layer().with_filter(create_filter()))
    } else {
        None
    };

    Registry::default()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()?;

    Ok(LogGuard {
        _file_guard: file_guard,
        log_file: log_dir.join(filename),
    })
}

/// Initialize logging for tests.
///
/// Stdout-only, and safe to call from every test: a second initialization is ignored.
pub fn test() {
    let _ = fmt()
        .with_env_filter(create_filter())
        .with_test_writer()
        .try_init();
}

/// Split an override into directory and file name.
///
/// A path with an extension names the file itself, anything else is treated as
/// the directory that receives `weft-<pid>.log`.
fn resolve_log_path(override_path: Option<PathBuf>) -> (PathBuf, String) {
    let filename = format!("weft-{}.log", std::process::id());

    if let Some(path) = override_path {
        if path.extension().is_some() {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(filename);
            return (dir.to_path_buf(), name);
        }
        return (path, filename);
    }

    let dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("weft")
        .join("logs");

    (dir, filename)
}

/// File filter: uses the user-specified level if set, otherwise `warn`.
fn create_file_filter() -> EnvFilter {
    let weft_log = env::var("WEFT_LOG").ok();
    let rust_log = env::var("RUST_LOG").ok();
    match user_directives(weft_log.as_deref(), rust_log.as_deref()) {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::new("warn"),
    }
}

fn create_filter() -> EnvFilter {
    let weft_log = env::var("WEFT_LOG").ok();
    let rust_log = env::var("RUST_LOG").ok();
    let directives = user_directives(weft_log.as_deref(), rust_log.as_deref())
        .unwrap_or_else(|| default_directives("info"));
    EnvFilter::new(directives)
}

/// Directives requested through the environment, `WEFT_LOG` first.
fn user_directives(weft_log: Option<&str>, rust_log: Option<&str>) -> Option<String> {
    weft_log
        .map(expand_weft_log)
        .or_else(|| rust_log.map(str::to_owned))
}

/// Expand a `WEFT_LOG` value into a full tracing filter string.
///
/// - `debug` becomes `warn,weft_model=debug,weft_runtime=debug,...`
/// - `host=trace` becomes `warn,weft_runtime::host=trace`
/// - targets that are not aliases pass through unchanged
fn expand_weft_log(weft_log: &str) -> String {
    let weft_log = weft_log.trim();
    if !weft_log.contains(['=', ',', ':']) {
        return default_directives(weft_log);
    }

    let mut directives = String::from("warn");
    for directive in weft_log.split(',').map(str::trim).filter(|d| !d.is_empty()) {
        directives.push(',');
        match directive.split_once('=') {
            Some((target, level)) => {
                directives.push_str(resolve_alias(target.trim()));
                directives.push('=');
                directives.push_str(level.trim());
            },
            None => directives.push_str(resolve_alias(directive)),
        }
    }
    directives
}

fn resolve_alias(target: &str) -> &str {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == target)
        .map_or(target, |(_, full)| full)
}

fn default_directives(level: &str) -> String {
    let mut directives = String::from("warn");
    for krate in CRATES {
        directives.push(',');
        directives.push_str(krate);
        directives.push('=');
        directives.push_str(level);
    }
    directives
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn override_with_extension_names_the_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("custom.log");

        let (dir, name) = resolve_log_path(Some(path));
        assert_eq!(dir, tmp.path());
        assert_eq!(name, "custom.log");
    }

    #[test]
    fn override_without_extension_is_a_directory() {
        let tmp = tempdir().unwrap();

        let (dir, name) = resolve_log_path(Some(tmp.path().to_path_buf()));
        assert_eq!(dir, tmp.path());
        assert_eq!(name, format!("weft-{}.log", std::process::id()));
    }

    #[test]
    fn default_path_lives_under_weft_logs() {
        let (dir, _) = resolve_log_path(None);
        assert!(dir.ends_with("weft/logs"));
    }

    #[test]
    fn bare_level_expands_to_every_crate() {
        assert_eq!(
            expand_weft_log(" debug "),
            "warn,weft_model=debug,weft_runtime=debug,weft_bin=debug"
        );
    }

    #[test]
    fn aliases_expand_to_module_targets() {
        assert_eq!(
            expand_weft_log("host=trace, stack=debug"),
            "warn,weft_runtime::host=trace,weft_model::stack=debug"
        );
    }

    #[test]
    fn unknown_targets_pass_through() {
        assert_eq!(
            expand_weft_log("tiny_http=info,session=debug"),
            "warn,tiny_http=info,weft_runtime::session=debug"
        );
        assert_eq!(expand_weft_log("weft_runtime::wait"), "warn,weft_runtime::wait");
    }

    #[test]
    fn weft_log_takes_priority_over_rust_log() {
        assert_eq!(
            user_directives(Some("server=debug"), Some("trace")).as_deref(),
            Some("warn,weft_runtime::server=debug")
        );
        assert_eq!(user_directives(None, Some("trace")).as_deref(), Some("trace"));
        assert_eq!(user_directives(None, None), None);
    }
}
