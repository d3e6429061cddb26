use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum FileFormatError {
    #[error("Failed to get file extension for {0}")]
    MissingFileExtension(String),
    #[error("Unsupported file extension for file: {0}")]
    UnsupportedFileExtension(String),
    #[error("YAML serialization failed")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON serialization failed")]
    Json(#[from] serde_json::Error),
    #[error("Failed to access {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type FileFormatResult<T> = Result<T, FileFormatError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
}

impl FileFormat {
    pub fn from_file_name(file_name: &str) -> FileFormatResult<Self> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| FileFormatError::MissingFileExtension(file_name.to_string()))?;

        if extension.eq_ignore_ascii_case("yaml") || extension.eq_ignore_ascii_case("yml") {
            Ok(Self::Yaml)
        } else if extension.eq_ignore_ascii_case("json") || extension.eq_ignore_ascii_case("geojson")
        {
            Ok(Self::Json)
        } else {
            Err(FileFormatError::UnsupportedFileExtension(
                file_name.to_string(),
            ))
        }
    }

    pub fn serialize<T: Serialize>(&self, value: &T) -> FileFormatResult<String> {
        let mut text = match self {
            FileFormat::Yaml => serde_yml::to_string(value)?,
            FileFormat::Json => serde_json::to_string_pretty(value)?,
        };
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Ok(text)
    }

    pub fn deserialize<T: DeserializeOwned>(&self, text: &str) -> FileFormatResult<T> {
        match self {
            FileFormat::Yaml => Ok(serde_yml::from_str(text)?),
            FileFormat::Json => Ok(serde_json::from_str(text)?),
        }
    }
}

/// Reads `path` and deserializes it with the format implied by its extension.
pub fn load_file<T: DeserializeOwned>(path: &str) -> FileFormatResult<T> {
    let format = FileFormat::from_file_name(path)?;
    let text = std::fs::read_to_string(path).map_err(|source| FileFormatError::Io {
        path: path.to_string(),
        source,
    })?;
    format.deserialize(&text)
}

pub fn save_file<T: Serialize>(path: &str, value: &T) -> FileFormatResult<()> {
    let format = FileFormat::from_file_name(path)?;
    let text = format.serialize(value)?;
    std::fs::write(path, text).map_err(|source| FileFormatError::Io {
        path: path.to_string(),
        source,
    })
}
