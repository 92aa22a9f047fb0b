//! Top-level `load_config` entry point: env > file > defaults, matching
//! the teacher's `knhk-config::config::load_config` precedence.

use std::path::Path;

use crate::env::apply_env_overrides;
use crate::error::{ConfigError, Result};
use crate::schema::{Config, FileConfig};

fn apply_file_config(config: &mut Config, file: FileConfig) -> Result<()> {
    if let Some(v) = file.closed_cache_size {
        config.closed_cache_size = v;
    }
    if let Some(v) = file.report_leaks {
        config.report_leaks = v;
    }
    if let Some(v) = file.servers {
        config.servers = v;
    }
    if let Some(v) = file.rank {
        config.rank = v;
    }
    if let Some(v) = file.listen_addr {
        config.listen_addr = v
            .parse()
            .map_err(|_| ConfigError::InvalidAddr(v))?;
    }
    if let Some(v) = file.checkpoint_file {
        config.checkpoint_file = Some(v);
    }
    Ok(())
}

/// Load a `dflow.toml`-shaped file, if `path` exists, and merge it over
/// `Config::default()`; a missing file is not an error, since every
/// field has a default.
fn load_file_config(path: &Path) -> Result<FileConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.display().to_string(), source }),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(source) => Err(ConfigError::Io { path: path.display().to_string(), source }),
    }
}

/// Resolve configuration for this process: start from defaults, layer
/// the file at `path` over it, then let environment variables override
/// whatever the file set.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = Config::default();
    let file = load_file_config(path)?;
    apply_file_config(&mut config, file)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Path::new("/nonexistent/dflow.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn file_overrides_defaults_and_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dflow.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "servers = 4\nrank = 2").unwrap();
        drop(f);

        let config = load_config(&path).unwrap();
        assert_eq!(config.servers, 4);
        assert_eq!(config.rank, 2);

        std::env::set_var("DFLOW_RANK", "7");
        let config = load_config(&path).unwrap();
        assert_eq!(config.rank, 7);
        assert_eq!(config.servers, 4);
        std::env::remove_var("DFLOW_RANK");
    }

    #[test]
    fn rejects_unknown_fields_in_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dflow.toml");
        std::fs::write(&path, "bogus_field = 1\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
