use std::collections::HashMap;
use std::env::VarsOs;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::Path;

/// How an env-dir file without an explicit action suffix is applied.
///
/// Buildpack API 0.5 switched the default from prepending (with the platform
/// path separator) to overriding; files with an explicit suffix behave the
/// same on every API revision.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ActionType {
    Override,
    PrependPath,
}

/// The environment the build driver threads between buildpacks.
///
/// The driver only ever talks to this trait, so tests (and platforms with
/// their own environment policies) can substitute an implementation that
/// records or rewrites the operations.
pub trait BuildEnv {
    /// The full environment, for buildpacks that see the process environment.
    fn list(&self) -> Vec<(OsString, OsString)>;

    /// The environment augmented with the platform's env-var files
    /// (`<platform>/env/<VAR>` contains the value of `VAR`).
    fn with_platform(&self, platform_dir: &Path) -> io::Result<Vec<(OsString, OsString)>>;

    /// Adds the conventional subdirectories of a layer root to the POSIX
    /// path variables.
    fn add_root_dir(&mut self, base_dir: &Path) -> io::Result<()>;

    /// Applies each file of an env directory as an environment operation.
    fn add_env_dir(&mut self, env_dir: &Path, default_action: ActionType) -> io::Result<()>;
}

/// Conventional layer subdirectories and the path variables they feed.
const ROOT_DIR_VARS: &[(&str, &str)] = &[
    ("bin", "PATH"),
    ("lib", "LD_LIBRARY_PATH"),
    ("lib", "LIBRARY_PATH"),
    ("include", "CPATH"),
    ("pkgconfig", "PKG_CONFIG_PATH"),
];

/// Generic collection of environment variables.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Env {
    inner: HashMap<OsString, OsString>,
}

impl Env {
    /// Creates an empty `Env`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `Env` from all the environment variables of the current
    /// process.
    ///
    /// The returned `Env` contains a snapshot of the process's environment
    /// variables at the time of this invocation. Modifications to environment
    /// variables afterwards will not be reflected in the returned value.
    #[must_use]
    pub fn from_current() -> Self {
        std::env::vars_os().into()
    }

    /// Inserts a key-value pair into the environment, overriding the value if
    /// `key` was already present.
    pub fn insert(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> &mut Self {
        self.inner.insert(key.into(), value.into());
        self
    }

    /// Returns the value corresponding to the given key.
    #[must_use]
    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&OsString> {
        self.inner.get(key.as_ref())
    }

    /// Returns true if the environment contains a value for the specified key.
    #[must_use]
    pub fn contains_key(&self, key: impl AsRef<OsStr>) -> bool {
        self.inner.contains_key(key.as_ref())
    }

    #[must_use]
    pub fn iter(&self) -> std::collections::hash_map::Iter<'_, OsString, OsString> {
        self.inner.iter()
    }

    fn prepend(&mut self, key: &OsStr, value: &OsStr, delimiter: &OsStr) {
        let mut new_value = OsString::new();
        new_value.push(value);

        if let Some(previous) = self.inner.get(key) {
            if !previous.is_empty() {
                new_value.push(delimiter);
                new_value.push(previous);
            }
        }

        self.inner.insert(key.to_os_string(), new_value);
    }

    fn append(&mut self, key: &OsStr, value: &OsStr, delimiter: &OsStr) {
        let mut new_value = OsString::new();

        if let Some(previous) = self.inner.get(key) {
            if !previous.is_empty() {
                new_value.push(previous);
                new_value.push(delimiter);
            }
        }

        new_value.push(value);
        self.inner.insert(key.to_os_string(), new_value);
    }

    fn set_default(&mut self, key: &OsStr, value: &OsStr) {
        if !self.inner.contains_key(key) {
            self.inner.insert(key.to_os_string(), value.to_os_string());
        }
    }
}

impl From<VarsOs> for Env {
    fn from(vars_os: VarsOs) -> Self {
        Self {
            inner: vars_os.collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Env {
    type Item = (&'a OsString, &'a OsString);
    type IntoIter = std::collections::hash_map::Iter<'a, OsString, OsString>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl BuildEnv for Env {
    fn list(&self) -> Vec<(OsString, OsString)> {
        let mut vars = self
            .inner
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<Vec<_>>();
        vars.sort();
        vars
    }

    fn with_platform(&self, platform_dir: &Path) -> io::Result<Vec<(OsString, OsString)>> {
        let mut env = self.clone();

        match fs::read_dir(platform_dir.join("env")) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry?;
                    if entry.file_type()?.is_dir() {
                        continue;
                    }
                    env.insert(entry.file_name(), read_value(&entry.path())?);
                }
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(error),
        }

        Ok(env.list())
    }

    fn add_root_dir(&mut self, base_dir: &Path) -> io::Result<()> {
        for (subdir, var) in ROOT_DIR_VARS {
            let path = base_dir.join(subdir);
            if path.is_dir() {
                self.prepend(
                    OsStr::new(var),
                    path.as_os_str(),
                    OsStr::new(PATH_LIST_SEPARATOR),
                );
            }
        }
        Ok(())
    }

    fn add_env_dir(&mut self, env_dir: &Path, default_action: ActionType) -> io::Result<()> {
        let mut files = match fs::read_dir(env_dir) {
            Ok(entries) => entries
                .map(|entry| entry.map(|entry| entry.path()))
                .collect::<io::Result<Vec<_>>>()?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(error),
        };
        files.retain(|path| path.is_file());
        files.sort();

        for path in files {
            let Some(name) = path.file_stem().map(OsStr::to_os_string) else {
                continue;
            };
            let value = read_value(&path)?;

            match path.extension().and_then(OsStr::to_str) {
                None if path.extension().is_none() => match default_action {
                    ActionType::Override => {
                        self.insert(name, value);
                    }
                    ActionType::PrependPath => {
                        self.prepend(&name, &value, OsStr::new(PATH_LIST_SEPARATOR));
                    }
                },
                Some("override") => {
                    self.insert(name, value);
                }
                Some("default") => self.set_default(&name, &value),
                Some("append") => {
                    let delimiter = self.env_file_delimiter(env_dir, &name)?;
                    self.append(&name, &value, &delimiter);
                }
                Some("prepend") => {
                    let delimiter = self.env_file_delimiter(env_dir, &name)?;
                    self.prepend(&name, &value, &delimiter);
                }
                // `.delim` files modify their sibling operations; unknown
                // suffixes are not operations at all.
                _ => {}
            }
        }

        Ok(())
    }
}

impl Env {
    fn env_file_delimiter(&self, env_dir: &Path, name: &OsStr) -> io::Result<OsString> {
        let mut file_name = name.to_os_string();
        file_name.push(".delim");
        let path = env_dir.join(file_name);
        if path.is_file() {
            read_value(&path)
        } else {
            Ok(OsString::new())
        }
    }
}

// File contents MUST NOT be evaluated by a shell or otherwise modified before
// inclusion in environment variable values, so they are read as raw bytes.
#[cfg(target_family = "unix")]
fn read_value(path: &Path) -> io::Result<OsString> {
    use std::os::unix::ffi::OsStringExt;
    Ok(OsString::from_vec(fs::read(path)?))
}

#[cfg(not(target_family = "unix"))]
fn read_value(path: &Path) -> io::Result<OsString> {
    Ok(OsString::from(fs::read_to_string(path)?))
}

#[cfg(target_family = "unix")]
const PATH_LIST_SEPARATOR: &str = ":";

#[cfg(target_family = "windows")]
const PATH_LIST_SEPARATOR: &str = ";";
