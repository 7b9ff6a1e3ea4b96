//! Logger factory tests
//!
//! Tests focus on what a caller of `make_logger` observes: the topic, the
//! log file and its lines, and the records the broker receives.


use mqtt_logging::factory::{log_file_name, LOG_FILE_SUFFIX};
use mqtt_logging::testing::MockConnector;
use mqtt_logging::{Destinations, SinkKind};
use std::fs;
use tempfile::TempDir;
use test_helpers::{mock_factory, test_config, test_config_with_output};
use tracing::Level;

#[test]
fn test_dotted_name_becomes_topic_levels() {
    let mock = MockConnector::new();
    let factory = mock_factory(test_config("DVT"), &mock);

    let logger = factory
        .make_logger("x.y.z", &Destinations::console_and_mqtt(), Level::INFO)
        .unwrap();

    assert_eq!(logger.topic(), "DVT/x/y/z/log");
    assert_eq!(logger.name(), "x.y.z");
    assert!(logger.log_file().is_none());
}

#[test]
fn test_project_namespace_is_configurable() {
    let mock = MockConnector::new();
    let factory = mock_factory(test_config("LAB"), &mock);

    let logger = factory
        .make_logger("bench", &Destinations::default(), Level::INFO)
        .unwrap();
    logger.info("hello");
    logger.flush();

    assert_eq!(mock.published_on("LAB/bench/log").len(), 1);
}

#[test]
fn test_file_output_creates_directories_and_writes_lines() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("nested").join("logs");
    let mock = MockConnector::new();
    let factory = mock_factory(test_config_with_output("DVT", &root), &mock);

    let logger = factory
        .make_logger("bench.rig", &factory.destinations(true), Level::DEBUG)
        .unwrap();
    logger.info("rig online");
    logger.debug("heater at 40%");
    logger.trace("filtered out");
    logger.flush();

    let path = logger.log_file().expect("File output was requested").to_path_buf();
    assert!(path.starts_with(&root));
    let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(file_name.ends_with(LOG_FILE_SUFFIX));
    assert_eq!(file_name.len(), log_file_name(chrono::Local::now()).len());

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2, "Unexpected file content: {content}");
    assert!(lines[0].ends_with(" - test_logger_factory - rig online"));
    assert!(lines[1].ends_with(" - test_logger_factory - heater at 40%"));

    // The broker saw the same two records
    assert_eq!(mock.published_on("DVT/bench/rig/log").len(), 2);
}

#[test]
fn test_info_level_lines_omit_module() {
    let temp_dir = TempDir::new().unwrap();
    let mock = MockConnector::new();
    let factory = mock_factory(test_config("DVT"), &mock);

    let logger = factory
        .make_logger("bench", &Destinations::with_file(temp_dir.path()), Level::INFO)
        .unwrap();
    logger.info("rig online");
    logger.debug("not written");
    logger.flush();

    let content = fs::read_to_string(logger.log_file().unwrap()).unwrap();
    let line = content.lines().next().unwrap();

    // `YYYY-MM-DD HH:MM:SS,mmm - message`
    let (asctime, message) = line.split_once(" - ").unwrap();
    assert_eq!(message, "rig online");
    assert_eq!(asctime.len(), "2024-05-01 13:45:12,345".len());
    assert_eq!(&asctime[19..20], ",");
    assert_eq!(content.lines().count(), 1);
}

#[test]
fn test_tracing_macros_inside_scope_reach_every_sink() {
    let temp_dir = TempDir::new().unwrap();
    let mock = MockConnector::new();
    let factory = mock_factory(test_config("DVT"), &mock);

    let logger = factory
        .make_logger("bench", &Destinations::with_file(temp_dir.path()), Level::DEBUG)
        .unwrap();
    logger.in_scope(|| tracing::warn!(temp = 81, "over limit"));
    {
        let _guard = logger.set_default();
        tracing::info!("via default");
    }
    logger.flush();

    let payloads: Vec<String> = mock
        .published_on("DVT/bench/log")
        .into_iter()
        .map(|m| m.payload)
        .collect();
    assert_eq!(payloads.len(), 2);
    assert!(payloads[0].ends_with("over limit temp=81"));
    assert!(payloads[1].ends_with("via default"));

    let content = fs::read_to_string(logger.log_file().unwrap()).unwrap();
    assert!(content.contains("over limit temp=81"));
    assert!(content.contains("via default"));
}

#[test]
fn test_destinations_select_sinks() {
    assert_eq!(
        Destinations::with_file("out").sink_kinds(),
        vec![SinkKind::Console, SinkKind::File, SinkKind::Mqtt]
    );
    assert!(!Destinations::default().log_to_file);
}
