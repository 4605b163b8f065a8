use crate::core::{SidecarConfig, SidecarTemplate};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

/// Reads and validates the sidecar configuration at `path`.
pub fn load_template(path: &Path) -> Result<SidecarTemplate> {
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read sidecar configuration {}", path.display()))?;

    let digest = format!("{:x}", Sha256::digest(&data));
    info!(path = %path.display(), sha256 = %digest, "Loaded sidecar configuration");

    parse_template(&data)
        .with_context(|| format!("invalid sidecar configuration {}", path.display()))
}

/// Parses a YAML (or JSON) sidecar configuration.
pub fn parse_template(data: &[u8]) -> Result<SidecarTemplate> {
    let config = serde_yaml::from_slice::<SidecarConfig>(data)?;
    Ok(SidecarTemplate::try_from(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TemplateError;
    use std::io::Write;

    const DEPLOYED: &[u8] = include_bytes!("../../../deploy/sidecar-config.yaml");

    #[test]
    fn parses_deployed_config() {
        let template = parse_template(DEPLOYED).expect("deployed config must be valid");
        assert_eq!(template.container().name, "goofys");
        assert_eq!(template.container().env.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn parses_json() {
        let json = serde_json::json!({
            "containers": [{
                "name": "goofys",
                "env": [
                    { "name": "A", "value": "" },
                    { "name": "B", "value": "" },
                    { "name": "C", "value": "" },
                ],
                "volumeMounts": [{ "name": "fd", "mountPath": "/fd" }],
            }],
            "volumes": [
                { "name": "fd", "emptyDir": {} },
                { "name": "csi", "csi": { "driver": "fuse.csi" } },
            ],
        });
        parse_template(json.to_string().as_bytes()).expect("json config must be valid");
    }

    #[test]
    fn rejects_invalid_config() {
        let error = parse_template(b"containers: []\nvolumes: []\n").unwrap_err();
        assert_eq!(
            error.downcast_ref::<TemplateError>(),
            Some(&TemplateError::Containers(0))
        );

        parse_template(b"containers: {").expect_err("malformed yaml must fail");
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DEPLOYED).unwrap();
        let template = load_template(file.path()).unwrap();
        assert_eq!(template, parse_template(DEPLOYED).unwrap());

        load_template(Path::new("/nonexistent/sidecar.yaml")).expect_err("missing file must fail");
    }
}
