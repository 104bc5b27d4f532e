//! Macro-based logging over one process-wide opaque sink.
//!
//! The sink is installed once at hypervisor enablement; until then (and in
//! builds that never install one) log lines are dropped. The core has no
//! time source, so lines carry a level tag only.

use core::fmt;

use spin::Once;

pub trait LogSink: Send + Sync {
    fn line(&self, args: fmt::Arguments);
}

static LOG_SINK: Once<&'static dyn LogSink> = Once::new();

/// Installs the log sink. Later calls are ignored.
pub fn init(sink: &'static dyn LogSink) {
    LOG_SINK.call_once(|| sink);
}

#[doc(hidden)]
pub fn _log(args: fmt::Arguments) {
    if let Some(sink) = LOG_SINK.get() {
        sink.line(args);
    }
}

pub const MIN_LOG_TYPE_NAME_WIDTH: usize = 5;

#[macro_export]
macro_rules! logln_ext {
    ($name: literal, $name_color: literal, $($arg:tt)*) => {
        $crate::logging::_log(format_args!(
            "[  \x1B[{name_color}m{name:<width$}\x1B[0m  ]\x1b[90m:\x1B[0m {}",
            format_args!($($arg)*),
            name_color = $name_color,
            name = $name,
            width = $crate::logging::MIN_LOG_TYPE_NAME_WIDTH
        ))
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => ($crate::logln_ext!("debug", 91, $($arg)*));
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => ($crate::logln_ext!("info", 92, $($arg)*));
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => ($crate::logln_ext!("warn", 93, $($arg)*));
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => ($crate::logln_ext!("error", 91, $($arg)*));
}
