//! The sample configuration shipped at the workspace root must load and
//! match the built-in defaults.

#![allow(clippy::unwrap_used)]

use std::path::PathBuf;

use avatar_core::config::AvatarConfig;

#[test]
fn sample_config_matches_defaults() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../avatar-config.yaml");
    let loaded = AvatarConfig::from_file(&path).unwrap();
    let defaults = AvatarConfig::parse("").unwrap();
    assert_eq!(loaded, defaults);
}
