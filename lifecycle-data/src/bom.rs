use serde::{Deserialize, Serialize};

use crate::build_plan::Require;
use crate::buildpack::GroupBuildpack;

/// One bill-of-materials entry: a fulfilled dependency stamped with the
/// buildpack that provided it.
///
/// The buildpack reference is reduced to `(id, version)` when the entry is
/// recorded; `api` and `homepage` never appear in a BOM.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct BomEntry {
    #[serde(flatten)]
    pub require: Require,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildpack: Option<GroupBuildpack>,
}

impl BomEntry {
    /// Stamps the entry with its originating buildpack.
    #[must_use]
    pub fn with_buildpack(mut self, buildpack: &GroupBuildpack) -> Self {
        self.buildpack = Some(buildpack.clone().no_opt().no_api().no_homepage());
        self
    }
}
