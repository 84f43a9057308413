use crate::cache::CacheProfile;
use crate::config::{PilotConfig, ENV_CACHE_WINDOW_MS, ENV_MAX_STEPS, ENV_USE_VISION};
use crate::errors::ConfigError;
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let config = PilotConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.run.max_steps, 25);
    assert_eq!(config.run.consecutive_failure_limit, 3);
    assert_eq!(config.cache.freshness(), Duration::from_secs(2));
}

#[test]
fn test_yaml_file_overrides_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "loop:\n  max_steps: 12\n  history_window: 3\ncache:\n  preset: realtime\nvision:\n  enabled: true\n  jpeg_quality: 60\n"
    )
    .unwrap();

    let config = PilotConfig::from_file(file.path()).unwrap();
    assert_eq!(config.run.max_steps, 12);
    assert_eq!(config.run.history_window, 3);
    // Unset keys keep their defaults.
    assert_eq!(config.run.consecutive_failure_limit, 3);
    assert_eq!(config.cache.preset, Some(CacheProfile::Realtime));
    assert_eq!(config.cache.freshness(), Duration::from_millis(100));
    assert!(config.vision.enabled);
    assert_eq!(config.vision.jpeg_quality, 60);
}

#[test]
fn test_explicit_freshness_wins_over_preset() {
    let config = PilotConfig::from_yaml_str(
        "cache:\n  preset: fast\n  freshness_ms: 250\n",
        "inline",
    )
    .unwrap();
    assert_eq!(config.cache.freshness(), Duration::from_millis(250));
}

#[test]
fn test_empty_file_means_defaults() {
    let config = PilotConfig::from_yaml_str("  \n", "inline").unwrap();
    assert_eq!(config, PilotConfig::default());
}

#[test]
fn test_env_overrides_apply_on_top_of_file() {
    let mut config = PilotConfig::from_yaml_str("loop:\n  max_steps: 12\n", "inline").unwrap();
    config
        .apply_env(lookup(&[
            (ENV_MAX_STEPS, "40"),
            (ENV_CACHE_WINDOW_MS, "750"),
            (ENV_USE_VISION, "yes"),
        ]))
        .unwrap();
    assert_eq!(config.run.max_steps, 40);
    assert_eq!(config.cache.freshness(), Duration::from_millis(750));
    assert!(config.vision.enabled);
}

#[test]
fn test_bad_env_value_names_the_variable() {
    let mut config = PilotConfig::default();
    let err = config
        .apply_env(lookup(&[(ENV_MAX_STEPS, "many")]))
        .unwrap_err();
    match err {
        ConfigError::Invalid { key, .. } => assert_eq!(key, ENV_MAX_STEPS),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_validation_rejects_zero_budgets() {
    let mut config = PilotConfig::default();
    config.run.max_steps = 0;
    assert!(config.validate().is_err());

    let mut config = PilotConfig::default();
    config.vision.jpeg_quality = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_unparseable_yaml_reports_origin() {
    let err = PilotConfig::from_yaml_str("loop: [1, 2", "broken.yaml").unwrap_err();
    assert!(err.to_string().contains("broken.yaml"));
}
