use serde::Deserialize;

use crate::bom::BomEntry;

/// The `build.toml` file a buildpack writes into its layers directory
/// (buildpack API 0.5 and above).
#[derive(Deserialize, Debug, Default)]
pub struct BuildToml {
    #[serde(default)]
    pub bom: Vec<BomEntry>,
    #[serde(default)]
    pub unmet: Vec<Unmet>,
}

/// A requirement from the buildpack plan that the buildpack chose not to
/// fulfill. The name must match an entry of the plan the buildpack received.
#[derive(Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Unmet {
    #[serde(default)]
    pub name: String,
}
