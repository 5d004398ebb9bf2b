use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const PROJECT_CONFIG_FILE: &str = ".womb.project.yml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Files,
    Memory,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Files => "files",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend: Backend,
    /// Characters of shared text shown before a redo branch diverges.
    pub preview_before: usize,
    /// Characters of diverging text shown for a redo branch.
    pub preview_after: usize,
    /// Refuse history entries that have no saved story or version.
    pub strict_drafts: bool,
    pub title_max_chars: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: Backend::Sqlite,
            preview_before: 10,
            preview_after: 60,
            strict_drafts: false,
            title_max_chars: 80,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    preview_before: Option<usize>,
    #[serde(default)]
    preview_after: Option<usize>,
    #[serde(default)]
    strict_drafts: Option<bool>,
    #[serde(default)]
    title_max_chars: Option<usize>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    InvalidBackend(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Yaml(err) => write!(f, "{err}"),
            Self::InvalidBackend(value) => write!(f, "unknown backend `{value}`"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}

#[derive(Debug, Default)]
struct ConfigLayer {
    backend: Option<Backend>,
    preview_before: Option<usize>,
    preview_after: Option<usize>,
    strict_drafts: Option<bool>,
    title_max_chars: Option<usize>,
}

/// Merges user, nearest project, and workspace config, in that order; later
/// layers win field by field.
pub fn load_settings(
    cwd: &Path,
    workspace_config: Option<&Path>,
    user_config: Option<&Path>,
) -> Result<Settings, ConfigError> {
    let mut settings = Settings::default();

    if let Some(path) = user_config.filter(|path| path.exists()) {
        merge_layer(&mut settings, load_config_layer(path)?);
    }

    if let Some(path) = find_nearest_project_config(cwd) {
        merge_layer(&mut settings, load_config_layer(&path)?);
    }

    if let Some(path) = workspace_config.filter(|path| path.exists()) {
        merge_layer(&mut settings, load_config_layer(path)?);
    }

    Ok(settings)
}

pub fn find_nearest_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

fn merge_layer(settings: &mut Settings, layer: ConfigLayer) {
    if let Some(backend) = layer.backend {
        settings.backend = backend;
    }
    if let Some(value) = layer.preview_before {
        settings.preview_before = value;
    }
    if let Some(value) = layer.preview_after {
        settings.preview_after = value;
    }
    if let Some(value) = layer.strict_drafts {
        settings.strict_drafts = value;
    }
    if let Some(value) = layer.title_max_chars {
        settings.title_max_chars = value.max(1);
    }
}

fn load_config_layer(path: &Path) -> Result<ConfigLayer, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_layer(&content)
}

fn parse_config_layer(content: &str) -> Result<ConfigLayer, ConfigError> {
    if content.trim().is_empty() {
        return Ok(ConfigLayer::default());
    }
    let raw: RawConfig = serde_yaml::from_str(content)?;
    let backend = raw.backend.as_deref().map(parse_backend).transpose()?;
    Ok(ConfigLayer {
        backend,
        preview_before: raw.preview_before,
        preview_after: raw.preview_after,
        strict_drafts: raw.strict_drafts,
        title_max_chars: raw.title_max_chars,
    })
}

pub fn load_config_file(path: &Path) -> Result<Settings, ConfigError> {
    let mut settings = Settings::default();
    merge_layer(&mut settings, load_config_layer(path)?);
    Ok(settings)
}

pub fn default_config_yaml() -> String {
    r#"backend: sqlite
preview_before: 10
preview_after: 60
strict_drafts: false
title_max_chars: 80
"#
    .to_string()
}

pub fn expand_tilde(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(path)
}

fn parse_backend(raw: &str) -> Result<Backend, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "sqlite" => Ok(Backend::Sqlite),
        "files" | "json" => Ok(Backend::Files),
        "memory" => Ok(Backend::Memory),
        _ => Err(ConfigError::InvalidBackend(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Backend, ConfigError, Settings, default_config_yaml, expand_tilde, load_config_file,
        load_settings,
    };
    use std::path::Path;

    #[test]
    fn default_yaml_parses_to_default_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        std::fs::write(&path, default_config_yaml()).expect("write config");

        let parsed = load_config_file(&path).expect("parse config");
        assert_eq!(parsed, Settings::default());
    }

    #[test]
    fn rejects_unknown_backend() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "backend: postgres\n").expect("write config");

        match load_config_file(&path) {
            Err(ConfigError::InvalidBackend(value)) => assert_eq!(value, "postgres"),
            other => panic!("expected invalid backend, got {other:?}"),
        }
    }

    #[test]
    fn expands_tilde_paths() {
        let expanded = expand_tilde("~/stories", Path::new("/home/writer"));
        assert_eq!(expanded, Path::new("/home/writer/stories"));
    }

    #[test]
    fn later_layers_override_field_by_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let workspace = root.join("books/novel");
        std::fs::create_dir_all(workspace.join(".womb")).expect("workspace config dir");
        std::fs::create_dir_all(root.join("home/.womb")).expect("home config dir");

        let user_cfg = root.join("home/.womb/config.yml");
        std::fs::write(
            &user_cfg,
            "backend: files\npreview_before: 4\npreview_after: 20\n",
        )
        .expect("write user config");

        std::fs::write(
            root.join("books/.womb.project.yml"),
            "preview_after: 30\nstrict_drafts: true\n",
        )
        .expect("write project config");

        let workspace_cfg = workspace.join(".womb/config.yml");
        std::fs::write(&workspace_cfg, "title_max_chars: 12\n").expect("write workspace config");

        let merged =
            load_settings(&workspace, Some(&workspace_cfg), Some(&user_cfg)).expect("merge");
        assert_eq!(merged.backend, Backend::Files);
        assert_eq!(merged.preview_before, 4);
        assert_eq!(merged.preview_after, 30);
        assert!(merged.strict_drafts);
        assert_eq!(merged.title_max_chars, 12);
    }

    #[test]
    fn uses_nearest_project_config_when_walking_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let workspace = root.join("books/novel");
        std::fs::create_dir_all(&workspace).expect("workspace dir");

        std::fs::write(root.join(".womb.project.yml"), "preview_after: 5\n")
            .expect("write root project config");
        std::fs::write(root.join("books/.womb.project.yml"), "preview_after: 7\n")
            .expect("write nearest project config");

        let merged = load_settings(&workspace, None, None).expect("merge with nearest");
        assert_eq!(merged.preview_after, 7);
    }
}
