use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("VGET_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[repository]
root = "/data/vgosdb"
session_dir = "/data/sessions"
work_dir = "/data/work"

[agency]
code = "GSFC"
"#;

    #[test]
    fn test_load_config_from_str_valid() {
        let config = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(config.agency.code, "GSFC");
    }

    #[test]
    fn test_load_config_from_str_missing_repository() {
        let result = load_config_from_str("[agency]\ncode = \"GSFC\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/vget.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{MINIMAL}").unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.repository.root.display().to_string(), "/data/vgosdb");
    }
}
