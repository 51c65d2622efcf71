// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Structured logging shared by the rastercat crates.
//!
//! Output is controlled by the `RASTERCAT_LOG` environment variable:
//! - `off` (default): nothing is emitted
//! - `error`, `warn`, `info`: progressively more operational detail
//! - `debug`: per-file reconciliation decisions and every SQL statement

use std::sync::Once;

// Re-export emit so the macros resolve from any crate
pub use emit;

/// Environment variable consulted by [`init_diagnostics`].
pub const LOG_ENV: &str = "RASTERCAT_LOG";

static INIT: Once = Once::new();

/// Map a `RASTERCAT_LOG` value to a minimum level. `None` means logging is off.
///
/// Unknown values fall back to `info` so a typo never silences a run.
pub fn parse_level(value: &str) -> Option<emit::Level> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" | "none" => None,
        "error" => Some(emit::Level::Error),
        "warn" | "warning" => Some(emit::Level::Warn),
        "debug" | "trace" => Some(emit::Level::Debug),
        _ => Some(emit::Level::Info),
    }
}

/// Initialize diagnostics from `RASTERCAT_LOG`.
///
/// Call once at startup; later calls are ignored.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let value = std::env::var(LOG_ENV).unwrap_or_default();
        let Some(level) = parse_level(&value) else {
            return;
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        // The runtime lives for the rest of the process
        std::mem::forget(rt);
    });
}

pub use init_diagnostics as init;

/// Routine progress: catalogs registered, runs started and finished.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Detail useful when tracing a run: SQL text, per-file decisions.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Recoverable problems, such as a single file failing inside an index run.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert!(parse_level("off").is_none());
        assert!(parse_level("").is_none());
        assert!(matches!(parse_level("DEBUG"), Some(emit::Level::Debug)));
        assert!(matches!(parse_level("warn"), Some(emit::Level::Warn)));
        assert!(matches!(parse_level("error"), Some(emit::Level::Error)));
        assert!(matches!(parse_level("verbose"), Some(emit::Level::Info)));
    }

    #[test]
    fn test_init_is_safe_to_call_multiple_times() {
        init_diagnostics();
        init_diagnostics();
    }

    #[test]
    fn test_macros_compile() {
        log_info!("Test message");
        log_debug!("Debug message with {value}", value: 42);
        log_warn!("Warning message");
        log_error!("Error message");
    }
}
