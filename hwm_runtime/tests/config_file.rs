//! The shipped configuration loads and selects a known module.

use hwm_common::config::ModuleConfig;
use hwm_runtime::ModuleRegistry;
use hwm_runtime::loopback::LoopbackConfig;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

#[test]
fn test_shipped_loopback_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/loopback.toml");
    let config = ModuleConfig::load_validated(&path).unwrap();
    assert_eq!(config.name, "loopback");
    assert!(ModuleRegistry::with_builtin_modules().get_factory(&config.name).is_some());

    let module: LoopbackConfig = config.module_config().unwrap();
    assert_eq!(module.num_dofs, 6);
}

#[test]
fn test_invalid_priority_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "name = \"arm\"\n[realtime]\npriority = 120").unwrap();
    assert!(ModuleConfig::load_validated(file.path()).is_err());
}
