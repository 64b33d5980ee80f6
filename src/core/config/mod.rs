//! Server configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory when
//! present (built-in defaults otherwise), then applies `HOST`, `PORT`,
//! `CORS_ORIGINS`, `HISTORY_DIR` and the `REDINK_*` overrides.
//!
//! # Module layout
//!
//! - **types**: `Config` and `Overrides`.
//! - **raw**: TOML deserialization types with serde defaults; private.
//! - **load**: `merge_toml`, `load`, `load_from`, `load_defaults`,
//!   `expand_home`.

mod load;
mod raw;
mod types;

pub use load::{expand_home, load, load_defaults, load_from};
pub use types::*;

impl Config {
    /// Config for tests: loopback, no CORS origins, dirs under `root`.
    pub fn test_default(root: &std::path::Path) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            cors_origins: Vec::new(),
            log_level: "info".into(),
            body_limit_bytes: raw::default_body_limit_mb() * 1024 * 1024,
            history_dir: root.join("history"),
            providers_dir: root.to_path_buf(),
            require_device_binding: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::{NamedTempFile, TempDir};

    const MINIMAL_TOML: &str = r#"
[server]
host = "127.0.0.1"
port = 8080
log_level = "debug"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    fn write_named(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, content).unwrap();
        p
    }

    #[test]
    fn defaults_without_file() {
        let cfg = load_defaults(&Overrides::default()).unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:12399");
        assert_eq!(cfg.history_dir, PathBuf::from("history"));
        assert_eq!(cfg.providers_dir, PathBuf::from("."));
        assert_eq!(cfg.body_limit_bytes, 50 * 1024 * 1024);
        assert!(cfg.cors_origins.contains(&"http://localhost:5173".to_string()));
        assert!(!cfg.require_device_binding);
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.history_dir, PathBuf::from("history"));
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let f = write_toml("");
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg, load_defaults(&Overrides::default()).unwrap());
    }

    #[test]
    fn overrides_win() {
        let f = write_toml(MINIMAL_TOML);
        let overrides = Overrides {
            host: Some("0.0.0.0".into()),
            port: Some("9000".into()),
            cors_origins: Some("https://a.example, https://b.example,".into()),
            history_dir: Some("/data/history".into()),
            providers_dir: Some("/data".into()),
            log_level: Some("warn".into()),
            require_device_binding: Some("true".into()),
        };
        let cfg = load_from(f.path(), &overrides).unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9000");
        assert_eq!(cfg.cors_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(cfg.history_dir, PathBuf::from("/data/history"));
        assert_eq!(cfg.providers_dir, PathBuf::from("/data"));
        assert_eq!(cfg.log_level, "warn");
        assert!(cfg.require_device_binding);
    }

    #[test]
    fn bad_port_override_errors() {
        let overrides = Overrides {
            port: Some("http".into()),
            ..Default::default()
        };
        let msg = load_defaults(&overrides).unwrap_err().to_string();
        assert!(msg.contains("PORT"));
    }

    #[test]
    fn bad_bool_override_errors() {
        let overrides = Overrides {
            require_device_binding: Some("maybe".into()),
            ..Default::default()
        };
        assert!(load_defaults(&overrides).is_err());
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(std::path::Path::new("/nonexistent/config.toml"), &Overrides::default());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn wrong_type_errors() {
        let f = write_toml("[server]\nport = \"eighty\"\n");
        assert!(load_from(f.path(), &Overrides::default()).is_err());
    }

    #[test]
    fn overlay_keeps_base_fields() {
        let dir = TempDir::new().unwrap();
        write_named(&dir, "base.toml", MINIMAL_TOML);
        let overlay = r#"
[meta]
base = "base.toml"

[server]
port = 9999

[security]
require_device_binding = true
"#;
        let overlay_path = write_named(&dir, "overlay.toml", overlay);
        let cfg = load_from(&overlay_path, &Overrides::default()).unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.log_level, "debug");
        assert!(cfg.require_device_binding);
    }

    #[test]
    fn cycle_detection() {
        let dir = TempDir::new().unwrap();
        let self_path = dir.path().join("self.toml");
        let content = format!("[meta]\nbase = \"{}\"\n\n{MINIMAL_TOML}", self_path.display());
        std::fs::write(&self_path, content).unwrap();
        let msg = load_from(&self_path, &Overrides::default()).unwrap_err().to_string();
        assert!(msg.contains("circular"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/redink/history");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with("history"));
    }

    #[test]
    fn plain_paths_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_home("relative/path"), PathBuf::from("relative/path"));
    }
}
