//! Loading configuration from disk and building drivers from it.

use fixed_fd::config::{Config, LogFormat};
use fixed_fd::{DriverBuilder, Error, IoEngine};
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_config_file() {
    let file = write_config(
        r#"
        engine = "emulated"
        sq_entries = 16
        workers = 1
        max_fixed_files = 8
        fixed_fd_floor = 200

        [logging]
        level = "fixed_fd=debug"
        format = "compact"
        "#,
    );
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.engine, IoEngine::Emulated);
    assert_eq!(config.sq_entries, 16);
    assert_eq!(config.max_fixed_files, 8);
    assert_eq!(config.fixed_fd_floor, 200);
    assert_eq!(config.logging.format, LogFormat::Compact);

    let driver = DriverBuilder::from_config(&config).build().unwrap();
    assert_eq!(driver.engine(), IoEngine::Emulated);
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(&dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_load_invalid_file() {
    let file = write_config("engine = \"epoll\"\n");
    assert!(matches!(Config::load(file.path()), Err(Error::Config(_))));

    let file = write_config("[logging]\nunknown = true\n");
    assert!(matches!(Config::load(file.path()), Err(Error::Config(_))));

    let file = write_config("fixed_fd_floor = 0\n");
    let err = Config::load(file.path()).unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);
}
