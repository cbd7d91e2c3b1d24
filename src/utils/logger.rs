use std::fmt::Display;

/// Target used for every record emitted by this crate.
pub const LOG_TARGET: &str = "apng_decoder";

#[macro_export]
macro_rules! log_info {
    ($msg:expr) => {
        $crate::utils::logger::Logger::log(
            $crate::utils::logger::LogLevel::Info,
            &$msg.to_string()
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::logger::Logger::log(
            $crate::utils::logger::LogLevel::Info,
            &format!($fmt, $($arg)*)
        )
    };
}

#[macro_export]
macro_rules! log_debug {
    ($msg:expr) => {
        $crate::utils::logger::Logger::log(
            $crate::utils::logger::LogLevel::Debug,
            &$msg.to_string()
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::logger::Logger::log(
            $crate::utils::logger::LogLevel::Debug,
            &format!($fmt, $($arg)*)
        )
    };
}

#[macro_export]
macro_rules! log_warn {
    ($msg:expr) => {
        $crate::utils::logger::Logger::log(
            $crate::utils::logger::LogLevel::Warning,
            &$msg.to_string()
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::logger::Logger::log(
            $crate::utils::logger::LogLevel::Warning,
            &format!($fmt, $($arg)*)
        )
    };
}

#[macro_export]
macro_rules! log_error {
    ($msg:expr) => {
        $crate::utils::logger::Logger::log(
            $crate::utils::logger::LogLevel::Error,
            &$msg.to_string()
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::logger::Logger::log(
            $crate::utils::logger::LogLevel::Error,
            &format!($fmt, $($arg)*)
        )
    };
}

#[derive(Debug, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

pub struct Logger {}

impl Logger {
    /// Hands the message to whatever `log` backend the host application installed.
    pub fn log(level: LogLevel, message: impl Display) {
        let level: log::Level = level.into();

        if log::log_enabled!(target: LOG_TARGET, level) {
            log::log!(target: LOG_TARGET, level, "{}", message);
        }
    }
}
