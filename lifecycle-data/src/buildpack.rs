use std::fmt;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::api::BuildpackApi;

/// Data structures for the Buildpack descriptor (buildpack.toml).
///
/// A descriptor is either a *component* buildpack (one that carries
/// `bin/detect` and `bin/build` executables) or a *composite* buildpack (one
/// that only references other buildpacks through an order definition). The
/// untagged representation makes a descriptor that is both at once
/// structurally impossible.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum BuildpackDescriptor {
    Component(ComponentDescriptor),
    Composite(CompositeDescriptor),
}

impl BuildpackDescriptor {
    pub fn api(&self) -> BuildpackApi {
        match self {
            BuildpackDescriptor::Component(descriptor) => descriptor.api,
            BuildpackDescriptor::Composite(descriptor) => descriptor.api,
        }
    }

    pub fn buildpack(&self) -> &Buildpack {
        match self {
            BuildpackDescriptor::Component(descriptor) => &descriptor.buildpack,
            BuildpackDescriptor::Composite(descriptor) => &descriptor.buildpack,
        }
    }

    /// The order definition, if this descriptor belongs to a composite buildpack.
    pub fn order(&self) -> Option<&[BuildpackGroup]> {
        match self {
            BuildpackDescriptor::Component(_) => None,
            BuildpackDescriptor::Composite(descriptor) => Some(&descriptor.order),
        }
    }
}

/// Descriptor of a component buildpack.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ComponentDescriptor {
    pub api: BuildpackApi,
    pub buildpack: Buildpack,
    #[serde(default)]
    pub metadata: Option<toml::value::Table>,
}

/// Descriptor of a composite buildpack, referencing other buildpacks through
/// its order definition.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct CompositeDescriptor {
    pub api: BuildpackApi,
    pub buildpack: Buildpack,
    pub order: Vec<BuildpackGroup>,
    #[serde(default)]
    pub metadata: Option<toml::value::Table>,
}

/// The `[buildpack]` table of a descriptor.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Buildpack {
    pub id: String,
    pub name: Option<String>,
    pub version: String,
    pub homepage: Option<String>,
    #[serde(default, rename = "clear-env")]
    pub clear_env: bool,
}

/// One group of an order definition: a sequence of buildpack references that
/// detect together.
#[derive(Deserialize, Serialize, Debug, Clone, Default, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BuildpackGroup {
    #[serde(default)]
    pub group: Vec<GroupBuildpack>,
}

/// A buildpack reference within a group.
///
/// `api` and `homepage` are not part of the authored order; they are filled
/// in from the descriptor during detection and stripped again before the
/// reference appears in a build plan. Two references are equal iff their
/// `(id, version)` pairs match.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GroupBuildpack {
    pub id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<BuildpackApi>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

impl GroupBuildpack {
    #[must_use]
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            optional: false,
            api: None,
            homepage: None,
        }
    }

    #[must_use]
    pub fn no_opt(mut self) -> Self {
        self.optional = false;
        self
    }

    #[must_use]
    pub fn no_api(mut self) -> Self {
        self.api = None;
        self
    }

    #[must_use]
    pub fn no_homepage(mut self) -> Self {
        self.homepage = None;
        self
    }
}

impl PartialEq for GroupBuildpack {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.version == other.version
    }
}

impl Eq for GroupBuildpack {}

impl Display for GroupBuildpack {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}@{}", self.id, self.version)
    }
}

/// Escapes a buildpack id for use as a single path segment.
#[must_use]
pub fn escape_id(id: &str) -> String {
    id.replace('/', "_")
}
