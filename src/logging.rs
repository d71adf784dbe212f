//! Logging utilities shared by the trainer and the CLI

/// Log level for progress output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Suppress all output
    Quiet,
    /// Normal output level
    Normal,
    /// Verbose output with additional details
    Verbose,
}

/// Log a message if the current level permits it
pub fn log(level: LogLevel, required: LogLevel, msg: &str) {
    if level != LogLevel::Quiet && (level == required || required == LogLevel::Normal) {
        println!("{msg}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels_compare() {
        assert_eq!(LogLevel::Quiet, LogLevel::Quiet);
        assert_ne!(LogLevel::Normal, LogLevel::Verbose);
    }
}
