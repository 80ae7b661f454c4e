//! Integration tests for logging system
//!
//! Lives in its own test binary because the global subscriber can only be
//! installed once per process.

use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LogLevel, LoggingConfig};

#[test]
fn test_logging_initializes_once() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug);

    init_logging(config.clone()).expect("first initialization succeeds");

    tracing::info!(path = "notes/a.md", "logging ready");

    let second = init_logging(config);
    assert!(second.is_err(), "a second global subscriber must be rejected");
}

#[test]
fn test_recipient_is_redacted() {
    let redacted = redact_if_sensitive("recipient", "someone@kindle.com");
    assert!(!redacted.contains("kindle.com"));
    assert!(redacted.starts_with('s'));
}
