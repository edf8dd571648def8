use serde::Deserialize;

/// The sibling `<layer>.toml` descriptor of a layer directory.
///
/// Only the `build` flag influences the build phase: build layers contribute
/// their root directories and env dirs to the environment of subsequent
/// buildpacks. The remaining fields are carried for the export and cache
/// phases, which consume them elsewhere.
#[derive(Deserialize, Debug, Default)]
pub struct LayerContentMetadata {
    #[serde(default)]
    pub build: bool,
    #[serde(default)]
    pub launch: bool,
    #[serde(default)]
    pub cache: bool,
    #[serde(default)]
    pub metadata: Option<toml::value::Table>,
    #[serde(default)]
    pub sha: Option<String>,
}
