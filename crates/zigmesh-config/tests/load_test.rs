#![allow(clippy::unwrap_used)]

use std::time::Duration;

use pretty_assertions::assert_eq;
use zigmesh_config::{Config, ConfigError, load_config_from, save_config_to};
use zigmesh_core::{DeviceId, OperationKind};

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(cfg, Config::default());
}

#[test]
fn file_values_override_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
coordinator = "0x00124B0012345678"
sync_on_start = true

[operations]
max_retries = 3

[operations.timeouts]
rename = "2s"
permit_join = "250ms"

[reconnect]
max_retries = 5
"#,
    )
    .unwrap();

    let cfg = load_config_from(&path).unwrap();
    assert!(cfg.sync_on_start);
    assert_eq!(cfg.operations.history_capacity, 256);

    let core = cfg.to_controller_config().unwrap();
    assert_eq!(core.coordinator, DeviceId::new("0x00124b0012345678"));
    assert_eq!(core.orchestrator.max_retries, 3);
    assert_eq!(
        core.orchestrator.timeouts.for_kind(OperationKind::Rename),
        Duration::from_secs(2)
    );
    assert_eq!(
        core.orchestrator.timeouts.for_kind(OperationKind::PermitJoin),
        Duration::from_millis(250)
    );
    assert_eq!(core.reconnect.max_retries, Some(5));
}

#[test]
fn unknown_operation_kind_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[operations.timeouts]\nteleport = \"1s\"\n").unwrap();

    assert!(matches!(
        load_config_from(&path),
        Err(ConfigError::Figment(_))
    ));
}

#[test]
fn invalid_duration_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[reconnect]\ninitial_delay = \"whenever\"\n").unwrap();

    assert!(matches!(
        load_config_from(&path),
        Err(ConfigError::Validation { .. })
    ));
}

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut cfg = Config::default();
    cfg.coordinator = "0xabcdef".into();
    cfg.operations
        .timeouts
        .insert(OperationKind::Configure, "45s".into());
    save_config_to(&cfg, &path).unwrap();

    assert_eq!(load_config_from(&path).unwrap(), cfg);
}
