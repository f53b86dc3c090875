//! Logging macros shared by every module
//!
//! Thin wrappers over `tracing` so call sites read the same everywhere.

/// Log an informational message
#[macro_export]
macro_rules! log_stderr {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*)
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}

#[cfg(test)]
mod tests {
    fn describe(value: Result<u16, String>) -> u16 {
        match value {
            Ok(port) => port,
            Err(e) => {
                crate::log_warn!("lookup failed: {}", e);
                0
            }
        }
    }

    #[test]
    fn macros_expand_in_expression_position() {
        let outcome: Result<(), String> = Err("refused".to_string());
        match outcome {
            Ok(()) => crate::log_debug!("ok"),
            Err(e) => crate::log_error!("failed: {}", e),
        }
        if describe(Ok(22)) == 22 {
            crate::log_stderr!("ssh")
        } else {
            crate::log_warn!("other")
        }
        assert_eq!(describe(Err("x".to_string())), 0);
    }
}
