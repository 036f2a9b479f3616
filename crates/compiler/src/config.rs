//! Compiler configuration
//!
//! Embedders configure a compilation with the builder, or load the
//! settings from a `forge.toml` project manifest:
//!
//! ```toml
//! [package]
//! name = "demo"
//!
//! [build]
//! search_paths = ["src", "vendor"]
//! dialect = "razorforge"
//! color = true
//! ```

use crate::codegen::{host_target, TargetPlatform};
use crate::token::Dialect;
use serde::Deserialize;
use std::path::PathBuf;

/// Settings for one compilation.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Force a dialect instead of deriving it from the file suffix
    pub dialect: Option<Dialect>,
    /// Where `import` paths are resolved
    pub search_paths: Vec<PathBuf>,
    /// Emit IR even when semantic errors were reported
    pub run_after_error: bool,
    /// ANSI color in formatted diagnostics
    pub color_diagnostics: bool,
    pub target: TargetPlatform,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            dialect: None,
            search_paths: vec![PathBuf::from(".")],
            run_after_error: false,
            color_diagnostics: false,
            target: host_target(),
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn with_run_after_error(mut self, run_after_error: bool) -> Self {
        self.run_after_error = run_after_error;
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color_diagnostics = color;
        self
    }

    /// Parse a `forge.toml` manifest into a configuration.
    pub fn from_manifest(toml_str: &str) -> Result<Self, String> {
        let manifest: ProjectManifest =
            toml::from_str(toml_str).map_err(|e| format!("Failed to parse forge.toml: {}", e))?;
        let mut config = CompilerConfig::new();
        if let Some(build) = manifest.build {
            if !build.search_paths.is_empty() {
                config.search_paths = build.search_paths.into_iter().map(PathBuf::from).collect();
            }
            config.dialect = match build.dialect.as_deref() {
                Some("razorforge") => Some(Dialect::RazorForge),
                Some("suflae") => Some(Dialect::Suflae),
                Some(other) => {
                    return Err(format!(
                        "Unknown dialect '{}' (expected 'razorforge' or 'suflae')",
                        other
                    ));
                }
                None => None,
            };
            config.color_diagnostics = build.color;
            config.run_after_error = build.run_after_error;
        }
        Ok(config)
    }
}

/// On-disk shape of `forge.toml`.
#[derive(Debug, Deserialize)]
struct ProjectManifest {
    #[serde(default)]
    #[allow(dead_code)]
    package: Option<PackageSection>,
    #[serde(default)]
    build: Option<BuildSection>,
}

#[derive(Debug, Deserialize)]
struct PackageSection {
    #[allow(dead_code)]
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct BuildSection {
    #[serde(default)]
    search_paths: Vec<String>,
    #[serde(default)]
    dialect: Option<String>,
    #[serde(default)]
    color: bool,
    #[serde(default)]
    run_after_error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = CompilerConfig::new();
        assert!(config.dialect.is_none());
        assert!(!config.run_after_error);
        assert_eq!(config.search_paths, vec![PathBuf::from(".")]);
    }

    #[test]
    fn test_builder_chaining() {
        let config = CompilerConfig::new()
            .with_dialect(Dialect::Suflae)
            .with_search_path("vendor")
            .with_run_after_error(true);
        assert_eq!(config.dialect, Some(Dialect::Suflae));
        assert!(config.run_after_error);
        assert_eq!(config.search_paths.len(), 2);
    }

    #[test]
    fn test_manifest_parsing() {
        let config = CompilerConfig::from_manifest(
            r#"
[package]
name = "demo"

[build]
search_paths = ["src", "vendor"]
dialect = "suflae"
color = true
"#,
        )
        .unwrap();
        assert_eq!(config.dialect, Some(Dialect::Suflae));
        assert!(config.color_diagnostics);
        assert_eq!(
            config.search_paths,
            vec![PathBuf::from("src"), PathBuf::from("vendor")]
        );
    }

    #[test]
    fn test_manifest_rejects_unknown_dialect() {
        let error = CompilerConfig::from_manifest("[build]\ndialect = \"basic\"\n").unwrap_err();
        assert!(error.contains("basic"));
    }

    #[test]
    fn test_empty_manifest_is_default() {
        let config = CompilerConfig::from_manifest("").unwrap();
        assert!(config.dialect.is_none());
        assert_eq!(config.search_paths, vec![PathBuf::from(".")]);
    }
}
