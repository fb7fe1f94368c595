pub mod scan;

pub use scan::{CompilerOptions, ConfigManager, CustomConfigBuilder, PacingConfig, PluginFailurePolicy, ScanConfig};
