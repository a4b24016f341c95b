//! Unit tests for `AppError` display format, codes and exit codes.

use session_warden::AppError;

#[test]
fn display_prefixes_each_variant() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Contention("held".into()), "contention: held"),
        (AppError::Corruption("broken".into()), "corruption: broken"),
        (AppError::Io("disk".into()), "io: disk"),
        (AppError::Migration("copy".into()), "migration: copy"),
        (AppError::Recovery("reset".into()), "recovery: reset"),
        (AppError::NotFound("x".into()), "not found: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn error_message_no_trailing_period() {
    let err = AppError::Contention("lock held by live process 42".into());
    let s = err.to_string();
    assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
}

#[test]
fn codes_are_stable() {
    assert_eq!(AppError::Config(String::new()).code(), "configuration_error");
    assert_eq!(AppError::Contention(String::new()).code(), "contention_error");
    assert_eq!(AppError::Corruption(String::new()).code(), "corruption_error");
    assert_eq!(AppError::Io(String::new()).code(), "io_error");
    assert_eq!(AppError::Migration(String::new()).code(), "migration_error");
    assert_eq!(AppError::Recovery(String::new()).code(), "recovery_error");
    assert_eq!(AppError::NotFound(String::new()).code(), "not_found");
}

#[test]
fn exit_codes_distinguish_config_and_contention() {
    assert_eq!(AppError::Config(String::new()).exit_code(), 2);
    assert_eq!(AppError::Contention(String::new()).exit_code(), 3);
    assert_eq!(AppError::Io(String::new()).exit_code(), 1);
    assert_eq!(AppError::Recovery(String::new()).exit_code(), 1);
}

#[test]
fn only_contention_is_retryable() {
    assert!(AppError::Contention(String::new()).is_retryable());
    assert!(!AppError::Io(String::new()).is_retryable());
    assert!(!AppError::Config(String::new()).is_retryable());
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("denied")));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
    let err: AppError = toml_err.into();
    assert!(matches!(err, AppError::Config(_)));
}
