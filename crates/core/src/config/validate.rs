use crate::bundle::SessionKind;
use crate::endpoint::{ListingParserKind, UploadStrategy};

use super::{types::Config, ConfigError, EndpointConfig};

/// Validate configuration.
///
/// Resolves every listing-parser and upload-strategy key up front so an
/// unknown key fails the run instead of silently degrading, and checks that
/// strategies match their endpoint's protocol.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.repository.root.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "repository.root cannot be empty".to_string(),
        ));
    }
    if config.agency.code.is_empty() {
        return Err(ConfigError::ValidationError(
            "agency.code cannot be empty".to_string(),
        ));
    }
    if config.registry.match_on.is_empty() {
        return Err(ConfigError::ValidationError(
            "registry.match_on cannot be empty".to_string(),
        ));
    }

    for (code, endpoint) in config
        .archive
        .iter()
        .chain(config.delivery.endpoints.iter())
    {
        validate_endpoint(code, endpoint)?;
    }

    for step in &config.steps {
        if step.tool.is_empty() {
            return Err(ConfigError::ValidationError(
                "steps[].tool cannot be empty".to_string(),
            ));
        }
    }

    for kind in config.auto.keys() {
        let known = toml::Value::String(kind.clone())
            .try_into::<SessionKind>()
            .is_ok();
        if !known {
            return Err(ConfigError::ValidationError(format!(
                "auto.{kind} is not a session kind"
            )));
        }
    }

    Ok(())
}

fn validate_endpoint(code: &str, endpoint: &EndpointConfig) -> Result<(), ConfigError> {
    if endpoint.host.is_empty() {
        return Err(ConfigError::InvalidEndpoint {
            code: code.to_string(),
            reason: "host cannot be empty".to_string(),
        });
    }

    if let Some(key) = &endpoint.parser {
        ListingParserKind::from_key(key).ok_or_else(|| ConfigError::UnknownParser {
            code: code.to_string(),
            key: key.clone(),
        })?;
    }

    if let Some(key) = &endpoint.upload {
        let strategy = UploadStrategy::from_key(key).ok_or_else(|| ConfigError::UnknownUpload {
            code: code.to_string(),
            key: key.clone(),
        })?;
        if !strategy.supports(endpoint.protocol) {
            return Err(ConfigError::InvalidEndpoint {
                code: code.to_string(),
                reason: format!(
                    "upload strategy '{key}' does not support protocol {}",
                    endpoint.protocol.scheme()
                ),
            });
        }
        if strategy.needs_script() && endpoint.script.is_none() {
            return Err(ConfigError::InvalidEndpoint {
                code: code.to_string(),
                reason: format!("upload strategy '{key}' requires a script url"),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    const BASE: &str = r#"
[repository]
root = "/data/vgosdb"
session_dir = "/data/sessions"
work_dir = "/data/work"

[agency]
code = "GSFC"
"#;

    #[test]
    fn test_validate_minimal() {
        let config = load_config_from_str(BASE).unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_unknown_parser() {
        let toml = format!(
            "{BASE}
[archive.bad]
protocol = \"https\"
host = \"example.org\"
parser = \"mystery\"
"
        );
        let config = load_config_from_str(&toml).unwrap();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::UnknownParser { .. })
        ));
    }

    #[test]
    fn test_validate_upload_protocol_mismatch() {
        let toml = format!(
            "{BASE}
[delivery.endpoints.bkg]
protocol = \"https\"
host = \"example.org\"
upload = \"bkg\"
"
        );
        let config = load_config_from_str(&toml).unwrap();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_validate_cddis_needs_script() {
        let toml = format!(
            "{BASE}
[delivery.endpoints.cddis]
protocol = \"https\"
host = \"example.org\"
upload = \"cddis\"
"
        );
        let config = load_config_from_str(&toml).unwrap();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_validate_unknown_auto_kind() {
        let toml = format!(
            "{BASE}
[auto.weekly]
cmd = \"nuSolve {{db_name}}\"
initials = \"WD\"
"
        );
        let config = load_config_from_str(&toml).unwrap();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
