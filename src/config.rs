use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_SESSION_ROOT: &str = ".dataflow_session";
pub const DEFAULT_EXPORT_DIR: &str = "exports";
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 30 * 60;

/// Process-wide settings shared by the binaries.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Address the web server listens on.
    pub bind_addr: String,
    /// Directory holding one sub-directory per session.
    pub session_root: PathBuf,
    /// Name of the artifact directory inside each session directory.
    pub export_dir_name: String,
    /// How long an in-memory web session may sit unused before it is
    /// dropped. Its autosave stays on disk and is resumed on the next visit.
    pub session_idle: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: DEFAULT_BIND.to_string(),
            session_root: PathBuf::from(DEFAULT_SESSION_ROOT),
            export_dir_name: DEFAULT_EXPORT_DIR.to_string(),
            session_idle: Duration::from_secs(DEFAULT_SESSION_IDLE_SECS),
        }
    }
}

impl Config {
    /// Directories for the session with the given identifier.
    pub fn session_config(&self, id: &str) -> SessionConfig {
        SessionConfig::with_export_dir(self.session_root.join(id), &self.export_dir_name)
    }

    /// Directories for the single session of a local command-line run,
    /// kept directly under the session root.
    pub fn local_session(&self) -> SessionConfig {
        SessionConfig::with_export_dir(self.session_root.clone(), &self.export_dir_name)
    }
}

/// Where one session keeps its autosave and its artifacts.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub dir: PathBuf,
    pub export_dir: PathBuf,
}

impl SessionConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_export_dir(dir.into(), DEFAULT_EXPORT_DIR)
    }

    fn with_export_dir(dir: PathBuf, export_dir_name: &str) -> Self {
        SessionConfig {
            export_dir: dir.join(export_dir_name),
            dir,
        }
    }

    pub fn autosave_dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_directories() {
        let config = Config {
            session_root: PathBuf::from("/tmp/root"),
            export_dir_name: "out".into(),
            ..Config::default()
        };
        let session = config.session_config("abc");
        assert_eq!(session.dir, PathBuf::from("/tmp/root/abc"));
        assert_eq!(session.export_dir, PathBuf::from("/tmp/root/abc/out"));
        assert_eq!(config.local_session().dir, PathBuf::from("/tmp/root"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.session_idle, Duration::from_secs(1800));
        assert_eq!(
            SessionConfig::new("s").export_dir,
            PathBuf::from("s").join("exports")
        );
    }
}
