//! Integration tests for chunkworker-config

use chunkworker_config::*;
use std::io::Write;
use std::time::Duration;
use temp_env::with_vars;

#[test]
fn test_default_config_validation() {
    let config = ChunkWorkerConfig::default();
    assert!(config.validate_all().is_ok());
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("CWTEST_ENV_BACKEND", Some("process")),
        ("CWTEST_ENV_JOB_TIMEOUT", Some("12")),
        ("CWTEST_ENV_MAX_IN_FLIGHT", Some("4")),
        ("CWTEST_ENV_MODULE_CODE", Some("file:///opt/modules/terrain.json")),
        ("CWTEST_ENV_LOG_LEVEL", Some("debug")),
    ];

    with_vars(vars, || {
        let loader = ConfigLoader::with_prefix("CWTEST_ENV");
        let config = loader.from_env().unwrap();

        assert_eq!(config.worker.backend, BackendKind::Process);
        assert_eq!(config.worker.job_timeout, Some(Duration::from_secs(12)));
        assert_eq!(config.worker.max_in_flight, Some(4));
        assert_eq!(config.module.code, "file:///opt/modules/terrain.json");
        assert_eq!(config.logging.level, LogLevel::Debug);
    });
}

#[test]
fn test_fractional_timeouts_and_worker_level() {
    let vars = vec![
        ("CWTEST_FRAC_JOB_TIMEOUT", Some("0.5")),
        ("CWTEST_FRAC_WORKER_LOG_LEVEL", Some("trace")),
    ];

    with_vars(vars, || {
        let config = ConfigLoader::with_prefix("CWTEST_FRAC").from_env().unwrap();
        assert_eq!(config.worker.job_timeout, Some(Duration::from_millis(500)));
        assert_eq!(config.logging.effective_worker_level(), LogLevel::Trace);
        assert_eq!(config.logging.level, LogLevel::Info);
    });
}

#[test]
fn test_invalid_env_override() {
    with_vars(vec![("CWTEST_BAD_READY_TIMEOUT", Some("soon"))], || {
        let loader = ConfigLoader::with_prefix("CWTEST_BAD");
        let result = loader.from_env();
        match result {
            Err(ConfigError::InvalidEnv { variable, .. }) => {
                assert_eq!(variable, "CWTEST_BAD_READY_TIMEOUT")
            }
            other => panic!("expected an env error, got {:?}", other),
        }
    });
}

#[test]
fn test_yaml_config_serialization() {
    let yaml = ChunkWorkerConfig::generate_sample();
    let parsed: ChunkWorkerConfig = serde_yaml::from_str(&yaml).unwrap();
    assert!(parsed.validate_all().is_ok());
    assert_eq!(parsed.module.code, "builtin:terrain");
}

#[test]
fn test_comprehensive_config_file() {
    let yaml = r#"
worker:
  backend: process
  program: /usr/local/bin/chunkworker
  ready_timeout: 10
  job_timeout: 5
  max_in_flight: 8

module:
  code: modules/terrain.json
  binary: modules/palette.bin

logging:
  level: warn
  format: json
  include_location: true
"#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let loader = ConfigLoader::with_prefix("CWTEST_FILE");
    let config = loader.from_file(file.path()).unwrap();

    assert_eq!(config.worker.backend, BackendKind::Process);
    assert_eq!(config.worker.program.as_deref(), Some("/usr/local/bin/chunkworker"));
    assert_eq!(config.worker.ready_timeout, Duration::from_secs(10));
    assert_eq!(config.worker.job_timeout, Some(Duration::from_secs(5)));
    assert_eq!(config.worker.configure_timeout, Duration::from_secs(30));
    assert!(config.module.is_externally_linked());
    assert_eq!(config.logging.format, LogFormat::Json);
    assert!(config.logging.include_location);
}

#[test]
fn test_invalid_yaml_rejected() {
    let loader = ConfigLoader::with_prefix("CWTEST_INVALID");

    let result = loader.from_yaml("module:\n  code: ftp://example.com/terrain.json\n");
    assert!(matches!(result, Err(ConfigError::DomainError { ref domain, .. }) if domain == "module"));

    let result = loader.from_yaml("worker: [not, a, map]");
    assert!(matches!(result, Err(ConfigError::Yaml(_))));
}
