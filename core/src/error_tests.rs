//! Tests for core error types

use crate::ProcError;

#[test]
fn test_error_codes() {
    assert_eq!(
        ProcError::Spawn {
            errno: 2,
            message: "test".to_string()
        }
        .code(),
        "PROC001"
    );
    assert_eq!(ProcError::Redirect("test".to_string()).code(), "PROC002");
    assert_eq!(
        ProcError::InvalidProcess("test".to_string()).code(),
        "PROC003"
    );
    assert_eq!(ProcError::Wait("test".to_string()).code(), "PROC004");
    assert_eq!(ProcError::Signal("test".to_string()).code(), "PROC005");
    assert_eq!(
        ProcError::TooManyArguments("test".to_string()).code(),
        "PROC006"
    );
    assert_eq!(ProcError::Overflow("test".to_string()).code(), "PROC007");
    assert_eq!(ProcError::Unsupported("test".to_string()).code(), "PROC008");
    assert_eq!(ProcError::Config("test".to_string()).code(), "PROC009");
}

#[test]
fn test_error_display() {
    let error = ProcError::Spawn {
        errno: 2,
        message: "no such file".to_string(),
    };
    assert_eq!(error.to_string(), "Spawn error (os error 2): no such file");

    let error = ProcError::Wait("mechanism failure".to_string());
    assert_eq!(error.to_string(), "Wait error: mechanism failure");
}

#[test]
fn test_os_error_extraction() {
    let error = ProcError::Spawn {
        errno: 13,
        message: "denied".to_string(),
    };
    assert_eq!(error.os_error(), Some(13));

    assert_eq!(ProcError::Wait("x".to_string()).os_error(), None);
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::from_raw_os_error(2);
    let error: ProcError = io.into();
    assert_eq!(error.code(), "PROC010");
    assert_eq!(error.os_error(), Some(2));
}
