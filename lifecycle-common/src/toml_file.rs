use serde::{de::DeserializeOwned, Serialize};
use std::{fs, io, path::Path};

/// An error that occurred during reading or writing a TOML file.
#[derive(thiserror::Error, Debug)]
pub enum TomlFileError {
    #[error("I/O error while reading/writing TOML file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML deserialization error while reading TOML file: {0}")]
    TomlDeserializationError(#[from] toml::de::Error),

    #[error("TOML serialization error while writing TOML file: {0}")]
    TomlSerializationError(#[from] toml::ser::Error),
}

/// Serializes the given value as TOML and writes it to the given file path.
///
/// # Errors
///
/// Will return `Err` if the file couldn't be written or the value couldn't be serialized as a TOML string.
pub fn write_toml_file(
    value: &impl Serialize,
    path: impl AsRef<Path>,
) -> Result<(), TomlFileError> {
    fs::write(path, toml::to_string(value)?)?;

    Ok(())
}

/// Reads the file at the given path and parses it as `A`.
///
/// # Errors
///
/// Will return `Err` if the file couldn't be read or its contents couldn't be deserialized.
pub fn read_toml_file<A: DeserializeOwned>(path: impl AsRef<Path>) -> Result<A, TomlFileError> {
    let contents = fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

/// Reads the file at the given path and parses it as `A`, treating a missing
/// file as `None`.
///
/// Buildpacks emit most of their output files only when they have something to
/// say, so callers routinely need to distinguish "not written" from "written
/// but malformed". Only the former maps to `None`; parse failures and other
/// I/O errors are surfaced as usual.
///
/// # Errors
///
/// Will return `Err` if the file exists but couldn't be read or deserialized.
pub fn read_optional_toml_file<A: DeserializeOwned>(
    path: impl AsRef<Path>,
) -> Result<Option<A>, TomlFileError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(toml::from_str(&contents)?)),
        Err(io_error) if io_error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(io_error) => Err(io_error.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Serialize, Debug, Eq, PartialEq)]
    struct TestDocument {
        name: String,
    }

    #[test]
    fn read_write_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("doc.toml");

        let document = TestDocument {
            name: String::from("manifest"),
        };

        write_toml_file(&document, &path).unwrap();
        assert_eq!(read_toml_file::<TestDocument>(&path).unwrap(), document);
    }

    #[test]
    fn read_optional_returns_none_for_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();

        let result =
            read_optional_toml_file::<TestDocument>(temp_dir.path().join("missing.toml")).unwrap();

        assert_eq!(result, None);
    }

    #[test]
    fn read_optional_surfaces_parse_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("doc.toml");
        std::fs::write(&path, "name = ").unwrap();

        let result = read_optional_toml_file::<TestDocument>(&path);

        assert!(matches!(
            result,
            Err(TomlFileError::TomlDeserializationError(_))
        ));
    }
}
