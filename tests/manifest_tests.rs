#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest policy tests.
//!
//! These tests parse Cargo.toml and check the project policy it encodes: the
//! panic-free lint set, the feature layout and the MSRV. If one fails, the
//! manifest has drifted from the agreed-upon standards.

use std::path::PathBuf;

fn manifest() -> toml::Table {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
    let raw = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read '{}': {e}", path.display()));
    raw.parse::<toml::Table>()
        .unwrap_or_else(|e| panic!("'{}' is not valid TOML: {e}", path.display()))
}

mod lints {
    use super::*;

    const PANIC_FREE_LINTS: &[&str] = &[
        "unwrap_used",
        "expect_used",
        "panic",
        "todo",
        "unimplemented",
        "indexing_slicing",
    ];

    #[test]
    fn panic_prone_lints_are_denied() {
        let manifest = manifest();
        let clippy = manifest["lints"]["clippy"]
            .as_table()
            .expect("Cargo.toml must have a [lints.clippy] section");
        for lint in PANIC_FREE_LINTS {
            assert_eq!(
                clippy.get(*lint).and_then(|v| v.as_str()),
                Some("deny"),
                "clippy::{lint} must be set to deny in [lints.clippy]"
            );
        }
    }
}

mod features {
    use super::*;

    #[test]
    fn websocket_transport_is_default() {
        let manifest = manifest();
        let default = manifest["features"]["default"].as_array().unwrap();
        assert!(default.iter().any(|f| f.as_str() == Some("transport-websocket")));
    }

    #[test]
    fn websocket_dependencies_are_optional() {
        let manifest = manifest();
        let deps = manifest["dependencies"].as_table().unwrap();
        for name in ["tokio-tungstenite", "futures-util"] {
            let optional = deps[name]
                .get("optional")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            assert!(optional, "{name} must be optional behind transport-websocket");
        }

        let feature = manifest["features"]["transport-websocket"]
            .as_array()
            .unwrap();
        for name in ["dep:tokio-tungstenite", "dep:futures-util"] {
            assert!(
                feature.iter().any(|f| f.as_str() == Some(name)),
                "transport-websocket must enable {name}"
            );
        }
    }

    #[test]
    fn tokio_has_process_support_for_bridge() {
        let manifest = manifest();
        let features = manifest["dependencies"]["tokio"]["features"]
            .as_array()
            .unwrap();
        for needed in ["process", "io-util", "time", "sync"] {
            assert!(
                features.iter().any(|f| f.as_str() == Some(needed)),
                "tokio must enable the `{needed}` feature"
            );
        }
    }
}

mod package {
    use super::*;

    #[test]
    fn declares_msrv() {
        let manifest = manifest();
        let version = manifest["package"]["rust-version"]
            .as_str()
            .expect("Cargo.toml must declare a rust-version");
        let parts: Vec<_> = version.split('.').collect();
        assert!(
            (2..=3).contains(&parts.len()) && parts.iter().all(|p| p.parse::<u32>().is_ok()),
            "rust-version '{version}' is not a valid version"
        );
    }

    #[test]
    fn readme_is_packaged() {
        let manifest = manifest();
        let include = manifest["package"]["include"].as_array().unwrap();
        assert!(include.iter().any(|p| p.as_str() == Some("/README.md")));
        assert!(PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("README.md")
            .is_file());
    }
}
