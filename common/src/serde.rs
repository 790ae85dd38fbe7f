use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::file_format::SerdeFormat;

pub type Result<T> = anyhow::Result<T>;

pub fn serialize<T: Serialize>(value: &T, format: SerdeFormat) -> Result<String> {
    let text = match format {
        SerdeFormat::Yaml => serde_yml::to_string(value)?,
        SerdeFormat::Json => serde_json::to_string_pretty(value)?,
    };
    Ok(text)
}

pub fn deserialize<T: DeserializeOwned>(serialized: &[u8], format: SerdeFormat) -> Result<T> {
    let text = std::str::from_utf8(serialized)?;
    match format {
        SerdeFormat::Yaml => Ok(serde_yml::from_str(text)?),
        SerdeFormat::Json => Ok(serde_json::from_str(text)?),
    }
}

/// Reads and deserializes a file, picking the format from its extension.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let format = SerdeFormat::from_path(path)?;
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read '{}'", path.display()))?;
    deserialize(&bytes, format).with_context(|| format!("Failed to parse '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        bounds: (i32, i32),
        scale: f64,
    }

    #[test]
    fn test_serialize_deserialize_all_formats() {
        let sample = Sample {
            name: "zero".to_string(),
            bounds: (-50, 30),
            scale: 0.25,
        };
        for format in SerdeFormat::all_formats_for_testing() {
            let text = serialize(&sample, format).unwrap();
            let parsed: Sample = deserialize(text.as_bytes(), format).unwrap();
            assert_eq!(parsed, sample, "format {format:?}");
        }
    }

    #[test]
    fn test_deserialize_rejects_invalid_utf8() {
        let result: Result<Sample> = deserialize(&[0xff, 0xfe, 0x00], SerdeFormat::Json);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_file_missing() {
        let result: Result<Sample> = load_file(Path::new("does/not/exist.yaml"));
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("Failed to read"), "{message}");
    }
}
