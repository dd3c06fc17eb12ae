//! Configuration file loading and validation.

use adc_control::config::AppConfig;
use adc_control::Controller;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_file_values_override_defaults() {
    let file = write_config(
        r#"
        [link]
        port = "/dev/ttyACM3"
        baud_rate = 9600

        [acquisition]
        averaging_window = 8
        duration_secs = 30

        [channels]
        names = ["0A=Working electrode", "1F=Reference"]
        enabled = ["1F=false"]
        expressions = ["0A=y * 1000"]
        "#,
    );

    let config = AppConfig::load_from(file.path()).unwrap();
    assert_eq!(config.link.port, "/dev/ttyACM3");
    assert_eq!(config.link.baud_rate, 9600);
    assert_eq!(config.link.completion_timeout_ms, 1000);
    assert_eq!(config.acquisition.averaging_window, 8);
    assert_eq!(config.acquisition.duration_secs, Some(30));
    assert_eq!(config.logging.level, "info");
    config.validate().unwrap();

    let mappings = config.channel_mappings().unwrap();
    assert_eq!(mappings.names[&0x0A], "Working electrode");
    assert!(!mappings.enabled[&0x1F]);
    assert_eq!(mappings.expressions[&0x0A], "y * 1000");
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.link.baud_rate, 115_200);
    assert_eq!(config.acquisition.averaging_window, 1);
    assert_eq!(config.acquisition.duration_secs, None);
}

#[test]
fn test_malformed_toml_is_an_error() {
    let file = write_config("[link\nport = ");
    assert!(AppConfig::load_from(file.path()).is_err());
}

#[test]
fn test_zero_window_rejected() {
    let file = write_config("[acquisition]\naveraging_window = 0\n");
    let config = AppConfig::load_from(file.path()).unwrap();
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("averaging_window"));
}

#[test]
fn test_bad_mapping_rejected() {
    let file = write_config("[channels]\nnames = [\"zz=Broken\"]\n");
    let config = AppConfig::load_from(file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_bad_expression_fails_controller_construction() {
    let file = write_config("[channels]\nexpressions = [\"01=(y * 2\"]\n");
    let config = AppConfig::load_from(file.path()).unwrap();
    assert!(Controller::new(config).is_err());
}

#[tokio::test]
async fn test_configured_channel_metadata_applied() {
    let file = write_config(
        r#"
        [channels]
        names = ["0A=Working electrode"]
        enabled = ["0A=false"]
        colors = ["0A=#ff8800"]
        "#,
    );
    let config = AppConfig::load_from(file.path()).unwrap();
    let controller = Controller::new(config).unwrap();

    controller.registry().record(0x0A, 1.0, 0.0);
    let meta = controller.registry().channel(0x0A).unwrap().meta();
    assert_eq!(meta.name, "Working electrode");
    assert!(!meta.enabled);
    assert_eq!(meta.color.as_deref(), Some("#ff8800"));
}
