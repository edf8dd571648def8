use serde::{Deserialize, Serialize};
use toml::value::Table;

use crate::buildpack::GroupBuildpack;
use crate::buildpack_plan::BuildpackPlan;

/// A provided dependency in a detect plan.
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
pub struct Provide {
    pub name: String,
}

impl Provide {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A required dependency.
///
/// The wire format historically allowed the version both as a top-level key
/// and under `metadata.version`. The canonical in-memory form keeps it in the
/// metadata table only; [`Require::convert_version_to_metadata`] establishes
/// that form and [`Require::convert_metadata_to_version`] mirrors it back up
/// for buildpacks speaking older API revisions. Both conversions are
/// idempotent.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Require {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Table::is_empty")]
    pub metadata: Table,
}

impl Require {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            metadata: Table::new(),
        }
    }

    /// Moves a top-level `version` into `metadata.version`.
    pub fn convert_version_to_metadata(&mut self) {
        if let Some(version) = self.version.take() {
            self.metadata
                .insert(String::from("version"), toml::Value::String(version));
        }
    }

    /// Copies `metadata.version` into the top-level `version` key, leaving the
    /// metadata untouched.
    pub fn convert_metadata_to_version(&mut self) {
        if let Some(version) = self.metadata.get("version") {
            self.version = Some(value_to_version_string(version));
        }
    }

    pub fn has_inconsistent_versions(&self) -> bool {
        match (&self.version, self.metadata.get("version")) {
            (Some(version), Some(metadata_version)) => {
                *version != value_to_version_string(metadata_version)
            }
            _ => false,
        }
    }

    pub fn has_doubly_specified_versions(&self) -> bool {
        self.version.is_some() && self.metadata.contains_key("version")
    }

    pub fn has_top_level_versions(&self) -> bool {
        self.version.is_some()
    }
}

fn value_to_version_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(string) => string.clone(),
        other => other.to_string(),
    }
}

/// One `provides`/`requires` block of a detect plan.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct PlanSections {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<Provide>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<Require>,
}

impl PlanSections {
    pub fn has_inconsistent_versions(&self) -> bool {
        self.requires.iter().any(Require::has_inconsistent_versions)
    }

    pub fn has_doubly_specified_versions(&self) -> bool {
        self.requires
            .iter()
            .any(Require::has_doubly_specified_versions)
    }

    pub fn has_top_level_versions(&self) -> bool {
        self.requires.iter().any(Require::has_top_level_versions)
    }
}

/// The document a detect executable writes to its plan path: a primary
/// `provides`/`requires` block plus ordered `or` alternatives.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct DetectPlan {
    #[serde(flatten)]
    pub sections: PlanSections,
    #[serde(default)]
    pub or: Vec<PlanSections>,
}

impl DetectPlan {
    pub fn has_inconsistent_versions(&self) -> bool {
        self.sections.has_inconsistent_versions()
            || self.or.iter().any(PlanSections::has_inconsistent_versions)
    }

    pub fn has_doubly_specified_versions(&self) -> bool {
        self.sections.has_doubly_specified_versions()
            || self
                .or
                .iter()
                .any(PlanSections::has_doubly_specified_versions)
    }

    pub fn has_top_level_versions(&self) -> bool {
        self.sections.has_top_level_versions()
            || self.or.iter().any(PlanSections::has_top_level_versions)
    }
}

/// The resolved build plan produced by detection.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct BuildPlan {
    #[serde(default)]
    pub entries: Vec<BuildPlanEntry>,
}

impl BuildPlan {
    /// The plan a single buildpack gets to see: the requires of every entry
    /// that lists the buildpack as a provider.
    #[must_use]
    pub fn find(&self, buildpack_id: &str) -> BuildpackPlan {
        let mut entries = Vec::new();
        for entry in &self.entries {
            if entry
                .providers
                .iter()
                .any(|provider| provider.id == buildpack_id)
            {
                entries.extend(entry.requires.iter().cloned());
            }
        }
        BuildpackPlan { entries }
    }

    /// Removes entries whose requirements were met by a buildpack, so later
    /// providers of the same dependency no longer see them.
    #[must_use]
    pub fn filter(&self, met_requires: &[String]) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|entry| {
                    !entry
                        .requires
                        .iter()
                        .any(|require| met_requires.contains(&require.name))
                })
                .cloned()
                .collect(),
        }
    }

    /// Whether the buildpack is recorded as a provider of an entry matching
    /// the given dependency name.
    #[must_use]
    pub fn provides(&self, buildpack_id: &str, name: &str) -> bool {
        self.entries.iter().any(|entry| {
            entry.requires.iter().any(|require| require.name == name)
                && entry
                    .providers
                    .iter()
                    .any(|provider| provider.id == buildpack_id)
        })
    }
}

/// One resolved dependency: the buildpacks that provide it and the
/// requirements they answer.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct BuildPlanEntry {
    #[serde(default)]
    pub providers: Vec<GroupBuildpack>,
    #[serde(default)]
    pub requires: Vec<Require>,
}

impl BuildPlanEntry {
    /// Strips the provider references down to `(id, version)`.
    #[must_use]
    pub fn no_opt(mut self) -> Self {
        self.providers = self
            .providers
            .into_iter()
            .map(|provider| provider.no_opt().no_api().no_homepage())
            .collect();
        self
    }
}
