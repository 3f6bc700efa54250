/// Application name
pub const APP_NAME: &str = "HomeControl";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default folder scanned for modules at startup
pub const DEFAULT_MODULES_DIR: &str = "modules";

/// Declarative spec document every folder module must contain
pub const MODULE_SPEC_FILE: &str = "module.yaml";

/// Code entry point every folder module must contain
pub const MODULE_ENTRY_FILE: &str = "module.so";

/// Extension that marks a single file as a file module
pub const MODULE_SOURCE_EXTENSION: &str = "so";

/// Directory names that never hold modules
pub const DEFAULT_IGNORED_DIRS: &[&str] = &["__pycache__", "target"];

/// Default log level when neither the config nor `RUST_LOG` sets one
pub const DEFAULT_LOG_LEVEL: &str = "info";
