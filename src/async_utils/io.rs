//! I/O utilities.
//!
//! Configuration files may be written as either TOML or JSON. We pick the
//! parser from the file extension, falling back to sniffing the first
//! non-whitespace byte.

use tokio::fs;

use crate::prelude::*;

/// Does this file look like JSON?
fn is_json_like(path: &Path, data: &str) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => true,
        Some("toml") => false,
        _ => data.trim_start().starts_with('{'),
    }
}

/// Read TOML or JSON from a file.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    // Read all at once because our parsing libraries don't do async I/O.
    let data = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    if is_json_like(path, &data) {
        serde_json::from_str(&data).with_context(|| {
            format!("Failed to parse JSON from file at path: {:?}", path)
        })
    } else {
        toml::from_str(&data).with_context(|| {
            format!("Failed to parse TOML from file at path: {:?}", path)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
    }

    #[tokio::test]
    async fn reads_toml_and_json() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let toml_path = dir.path().join("sample.toml");
        std::fs::write(&toml_path, "name = \"toml\"\n")?;
        let sample: Sample = read_json_or_toml(&toml_path).await?;
        assert_eq!(sample.name, "toml");

        // No extension, so we sniff the contents.
        let json_path = dir.path().join("sample");
        std::fs::write(&json_path, "  {\"name\": \"json\"}")?;
        let sample: Sample = read_json_or_toml(&json_path).await?;
        assert_eq!(sample.name, "json");
        Ok(())
    }

    #[tokio::test]
    async fn reports_missing_files() {
        let result = read_json_or_toml::<Sample>(Path::new("no/such/file.toml")).await;
        assert!(result.is_err());
    }
}
