//! Configuration files on disk.

use hark::HarkConfig;
use hark::config::ContinuationPolicy;
use hark::error::HarkError;

#[test]
fn saved_config_loads_back_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = HarkConfig::default();
    config.wake.wake_word = "computer".into();
    config.session.continuation = ContinuationPolicy::AnyHistory;
    config.session.decline_phrases = vec!["stop".into()];
    config.agent.max_tool_iterations = 8;
    config.autopilot.settle_delay_ms = 250;
    config.save_to_file(&path).unwrap();

    let loaded = HarkConfig::from_file(&path).unwrap();
    assert_eq!(
        toml::to_string_pretty(&loaded).unwrap(),
        toml::to_string_pretty(&config).unwrap()
    );
}

#[test]
fn hand_written_file_only_needs_what_it_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[wake]
wake_word = "friday"

[session]
continuous_off_phrase = "stop listening"
"#,
    )
    .unwrap();

    let config = HarkConfig::from_file(&path).unwrap();
    assert_eq!(config.wake.wake_word, "friday");
    assert_eq!(config.session.continuous_off_phrase, "stop listening");
    assert_eq!(config.agent.max_tool_iterations, 5);
    assert_eq!(config.autopilot.max_iterations, 10);
}

#[test]
fn invalid_file_is_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[agent]\nmax_tool_iterations = 0\n").unwrap();

    assert!(matches!(
        HarkConfig::from_file(&path),
        Err(HarkError::Config(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = HarkConfig::from_file(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(HarkError::Io(_))));
}
