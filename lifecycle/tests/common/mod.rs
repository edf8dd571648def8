#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// On-disk buildpack fixtures laid out the way the buildpack store expects
/// them: `<buildpacks>/<escaped id>/<version>/buildpack.toml` plus executable
/// stubs under `bin/`.
pub struct BuildpacksDir {
    pub path: PathBuf,
}

impl BuildpacksDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn write_component(&self, id: &str, version: &str, api: &str) -> PathBuf {
        self.write_component_with(id, version, api, false)
    }

    pub fn write_component_with(
        &self,
        id: &str,
        version: &str,
        api: &str,
        clear_env: bool,
    ) -> PathBuf {
        let dir = self.buildpack_dir(id, version);
        fs::create_dir_all(dir.join("bin")).unwrap();
        fs::write(
            dir.join("buildpack.toml"),
            format!(
                "api = \"{api}\"\n\n[buildpack]\nid = \"{id}\"\nversion = \"{version}\"\nclear-env = {clear_env}\n"
            ),
        )
        .unwrap();
        dir
    }

    pub fn write_composite(&self, id: &str, version: &str, api: &str, order_toml: &str) {
        let dir = self.buildpack_dir(id, version);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("buildpack.toml"),
            format!("api = \"{api}\"\n\n[buildpack]\nid = \"{id}\"\nversion = \"{version}\"\n\n{order_toml}"),
        )
        .unwrap();
    }

    fn buildpack_dir(&self, id: &str, version: &str) -> PathBuf {
        self.path.join(id.replace('/', "_")).join(version)
    }
}

/// Writes an executable `/bin/sh` stub. The body sees the arguments of the
/// detect or build contract (`$1`, `$2`, …) and runs with the application
/// directory as its working directory.
pub fn write_script(buildpack_dir: &Path, name: &str, body: &str) {
    let path = buildpack_dir.join("bin").join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
