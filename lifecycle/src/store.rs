use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use lifecycle_common::{read_toml_file, TomlFileError};
use lifecycle_data::buildpack::{escape_id, BuildpackDescriptor};

/// A buildpack descriptor together with the directory it was loaded from.
#[derive(Debug)]
pub struct StoredBuildpack {
    pub dir: PathBuf,
    pub descriptor: BuildpackDescriptor,
}

/// An error locating or parsing a buildpack descriptor.
///
/// Descriptor errors are fatal to the enclosing detect or build operation;
/// there is no fallback order to consult when a referenced buildpack cannot
/// be loaded.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("reading buildpack.toml of '{reference}': {source}")]
    InvalidDescriptor {
        reference: String,
        source: TomlFileError,
    },
}

/// Resolves buildpack references against a buildpacks directory laid out as
/// `<dir>/<escaped id>/<version>/buildpack.toml`.
///
/// Descriptors are parsed once per process: concurrent lookups of the same
/// `id@version` observe the same [`StoredBuildpack`] instance.
pub struct BuildpackStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<StoredBuildpack>>>,
}

impl BuildpackStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn lookup(&self, id: &str, version: &str) -> Result<Arc<StoredBuildpack>, StoreError> {
        let reference = format!("{id}@{version}");

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stored) = cache.get(&reference) {
            return Ok(Arc::clone(stored));
        }

        let dir = self.dir.join(escape_id(id)).join(version);
        let descriptor = read_toml_file(dir.join("buildpack.toml")).map_err(|source| {
            StoreError::InvalidDescriptor {
                reference: reference.clone(),
                source,
            }
        })?;

        let stored = Arc::new(StoredBuildpack { dir, descriptor });
        cache.insert(reference, Arc::clone(&stored));
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_descriptor(buildpacks_dir: &std::path::Path, id: &str, version: &str, toml: &str) {
        let dir = buildpacks_dir.join(escape_id(id)).join(version);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("buildpack.toml"), toml).unwrap();
    }

    #[test]
    fn lookup_resolves_escaped_ids() {
        let temp_dir = tempdir().unwrap();
        write_descriptor(
            temp_dir.path(),
            "example/ruby",
            "1.0.0",
            r#"
api = "0.6"

[buildpack]
id = "example/ruby"
version = "1.0.0"
"#,
        );

        let store = BuildpackStore::new(temp_dir.path());
        let stored = store.lookup("example/ruby", "1.0.0").unwrap();

        assert_eq!(stored.descriptor.buildpack().id, "example/ruby");
        assert_eq!(
            stored.dir,
            temp_dir.path().join("example_ruby").join("1.0.0")
        );
    }

    #[test]
    fn lookup_returns_the_same_instance_per_reference() {
        let temp_dir = tempdir().unwrap();
        write_descriptor(
            temp_dir.path(),
            "a",
            "v1",
            "api = \"0.4\"\n\n[buildpack]\nid = \"a\"\nversion = \"v1\"\n",
        );

        let store = BuildpackStore::new(temp_dir.path());
        let first = store.lookup("a", "v1").unwrap();
        let second = store.lookup("a", "v1").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn lookup_fails_for_missing_descriptors() {
        let temp_dir = tempdir().unwrap();

        let store = BuildpackStore::new(temp_dir.path());
        let error = store.lookup("a", "v1").unwrap_err();

        assert!(error.to_string().contains("a@v1"));
    }

    #[test]
    fn lookup_fails_for_malformed_descriptors() {
        let temp_dir = tempdir().unwrap();
        write_descriptor(temp_dir.path(), "a", "v1", "api = ");

        let store = BuildpackStore::new(temp_dir.path());
        assert!(store.lookup("a", "v1").is_err());
    }
}
