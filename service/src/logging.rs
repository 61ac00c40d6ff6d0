use crate::config::Config;
use log::{LevelFilter, SetLoggerError};
use simplelog::{self, ColorChoice, ConfigBuilder, TerminalMode};

/// Modules to filter out from logging when not in Trace mode.
/// The HTTP and WebSocket stacks log every frame and request at DEBUG.
const FILTERED_MODULES: &[&str] = &[
    "tower",
    "tower_http",
    "hyper",
    "axum",
    "tungstenite",
    "tokio_tungstenite",
];

pub struct Logger {}

impl Logger {
    /// Initializes the global logger with configuration based on the provided Config.
    ///
    /// When the log level is set to Trace, all logs including dependency logs are shown.
    /// For all other log levels, verbose dependency logs are filtered out. Colored
    /// output is only used outside of production, where logs go to a collector.
    pub fn init_logger(config: &Config) {
        if let Err(e) = Self::try_init_logger(config) {
            eprintln!("Logger was already initialized: {e}");
        }
    }

    /// Same as [`Logger::init_logger`] but hands back the error when a global
    /// logger has already been installed.
    pub fn try_init_logger(config: &Config) -> Result<(), SetLoggerError> {
        let apply_filters = Self::should_filter_dependencies(config.log_level_filter);
        let log_config = Self::build_log_config(apply_filters);

        simplelog::TermLogger::init(
            config.log_level_filter,
            log_config,
            TerminalMode::Mixed,
            Self::color_choice(config),
        )
    }

    /// Determines whether dependency logging should be filtered.
    ///
    /// Returns `false` for Trace level (show all logs), `true` for all other levels.
    fn should_filter_dependencies(level: LevelFilter) -> bool {
        level != LevelFilter::Trace
    }

    fn color_choice(config: &Config) -> ColorChoice {
        if config.is_production() {
            ColorChoice::Never
        } else {
            ColorChoice::Auto
        }
    }

    /// Builds a simplelog Config with optional module filtering.
    fn build_log_config(apply_filters: bool) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();

        if apply_filters {
            for module in FILTERED_MODULES {
                builder.add_filter_ignore_str(module);
            }
        }

        builder.build()
    }
}
