use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::{fmt, str::FromStr};

use fancy_regex::Regex;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize, Serializer};

// Used as a "shadow" struct to store
// potentially invalid `BuildpackApi` data when deserializing
// <https://dev.to/equalma/validate-fields-and-types-in-serde-with-tryfrom-c2n>
#[derive(Deserialize)]
struct BuildpackApiUnchecked(String);

impl TryFrom<BuildpackApiUnchecked> for BuildpackApi {
    type Error = BuildpackApiError;

    fn try_from(value: BuildpackApiUnchecked) -> Result<Self, Self::Error> {
        Self::from_str(value.0.as_str())
    }
}

/// The Buildpack API version.
///
/// This MUST be in form `<major>.<minor>` or `<major>`, where `<major>` is equivalent to `<major>.0`.
///
/// Ordering is lexicographic over `(major, minor)`; compatibility rules that
/// vary between API revisions are queried through [`BuildpackApi::supports`]
/// so the revision table lives in exactly one place.
#[derive(Deserialize, Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "BuildpackApiUnchecked")]
pub struct BuildpackApi {
    pub major: u32,
    pub minor: u32,
}

/// A compatibility rule whose behavior depends on the buildpack API version.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ApiFeature {
    /// `version` and `metadata.version` may both appear in a require, but must agree.
    ConsistentVersionCheck,
    /// `version` together with `metadata.version` in a require is an error.
    ExclusiveVersionKeys,
    /// A bare top-level `version` in detect output draws a deprecation warning.
    TopLevelVersionDeprecated,
    /// A bare top-level `version` in buildpack output is rejected outright.
    TopLevelVersionRejected,
    /// `build.toml` is read for unmet requires and the build BOM.
    BuildToml,
    /// Launch and build BOMs come from `launch.toml` and `build.toml`
    /// respectively instead of the output buildpack plan.
    SplitBoms,
    /// Env-dir files without an action suffix default to `override` instead of
    /// `prepend-path`.
    EnvDirDefaultOverride,
}

impl BuildpackApi {
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Returns whether the given compatibility rule is in effect for this API
    /// version.
    #[must_use]
    pub fn supports(&self, feature: ApiFeature) -> bool {
        match feature {
            ApiFeature::ConsistentVersionCheck => *self == Self::new(0, 2),
            ApiFeature::ExclusiveVersionKeys | ApiFeature::TopLevelVersionDeprecated => {
                *self >= Self::new(0, 3)
            }
            ApiFeature::TopLevelVersionRejected
            | ApiFeature::BuildToml
            | ApiFeature::SplitBoms
            | ApiFeature::EnvDirDefaultOverride => *self >= Self::new(0, 5),
        }
    }
}

impl FromStr for BuildpackApi {
    type Err = BuildpackApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"^(?P<major>\d+)(\.(?P<minor>\d+))?$").unwrap();
        }

        if let Some(captures) = RE.captures(value).unwrap_or_default() {
            if let Some(major) = captures.name("major") {
                // these should never panic since we check with the regex unless it's greater than
                // `std::u32::MAX`
                let major = major
                    .as_str()
                    .parse::<u32>()
                    .map_err(|_| Self::Err::InvalidBuildpackApi(String::from(value)))?;

                // If no minor version is specified default to 0.
                let minor = captures
                    .name("minor")
                    .map_or("0", |s| s.as_str())
                    .parse::<u32>()
                    .map_err(|_| Self::Err::InvalidBuildpackApi(String::from(value)))?;

                return Ok(Self { major, minor });
            }
        }

        Err(Self::Err::InvalidBuildpackApi(String::from(value)))
    }
}

impl Display for BuildpackApi {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&format!("{}.{}", self.major, self.minor))
    }
}

impl Serialize for BuildpackApi {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BuildpackApiError {
    #[error("Found `{0}` but value MUST be in the form `<major>.<minor>` or `<major>` and only contain numbers.")]
    InvalidBuildpackApi(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    // Containing struct required due to: https://github.com/alexcrichton/toml-rs/issues/253
    #[derive(Deserialize, Debug, Eq, PartialEq)]
    struct TestBuildpackToml {
        api: BuildpackApi,
    }

    #[test]
    fn deserialize_valid_api_versions() {
        assert_eq!(
            toml::from_str::<TestBuildpackToml>("api = '1.3'").unwrap(),
            TestBuildpackToml {
                api: BuildpackApi { major: 1, minor: 3 }
            },
        );
        assert_eq!(
            toml::from_str::<TestBuildpackToml>("api = '0.0'").unwrap(),
            TestBuildpackToml {
                api: BuildpackApi { major: 0, minor: 0 }
            },
        );
        assert_eq!(
            toml::from_str::<TestBuildpackToml>("api = '2020.10'").unwrap(),
            TestBuildpackToml {
                api: BuildpackApi {
                    major: 2020,
                    minor: 10
                }
            },
        );
        assert_eq!(
            toml::from_str::<TestBuildpackToml>("api = '2'").unwrap(),
            TestBuildpackToml {
                api: BuildpackApi { major: 2, minor: 0 }
            },
        );
    }

    #[test]
    fn reject_invalid_api_versions() {
        let err = toml::from_str::<TestBuildpackToml>("api = '1.2.3'").unwrap_err();
        assert!(err.to_string().contains("Found `1.2.3` but value MUST"));

        let err = toml::from_str::<TestBuildpackToml>("api = '1.2-dev'").unwrap_err();
        assert!(err.to_string().contains("Found `1.2-dev` but value MUST"));

        let err = toml::from_str::<TestBuildpackToml>("api = '-1'").unwrap_err();
        assert!(err.to_string().contains("Found `-1` but value MUST"));

        let err = toml::from_str::<TestBuildpackToml>("api = '.1'").unwrap_err();
        assert!(err.to_string().contains("Found `.1` but value MUST"));

        let err = toml::from_str::<TestBuildpackToml>("api = '1.'").unwrap_err();
        assert!(err.to_string().contains("Found `1.` but value MUST"));

        let err = toml::from_str::<TestBuildpackToml>("api = ''").unwrap_err();
        assert!(err.to_string().contains("Found `` but value MUST"));
    }

    #[test]
    fn buildpack_api_display() {
        assert_eq!(BuildpackApi::new(1, 0).to_string(), "1.0");
        assert_eq!(BuildpackApi::new(1, 2).to_string(), "1.2");
        assert_eq!(BuildpackApi::new(0, 10).to_string(), "0.10");
    }

    #[test]
    fn buildpack_api_ordering() {
        assert!(BuildpackApi::new(0, 2) < BuildpackApi::new(0, 3));
        assert!(BuildpackApi::new(0, 10) > BuildpackApi::new(0, 9));
        assert!(BuildpackApi::new(1, 0) > BuildpackApi::new(0, 99));
        assert_eq!(BuildpackApi::new(0, 4), BuildpackApi::new(0, 4));
    }

    #[test]
    fn feature_gates_match_the_revision_table() {
        let v02 = BuildpackApi::new(0, 2);
        let v03 = BuildpackApi::new(0, 3);
        let v04 = BuildpackApi::new(0, 4);
        let v05 = BuildpackApi::new(0, 5);
        let v06 = BuildpackApi::new(0, 6);

        assert!(v02.supports(ApiFeature::ConsistentVersionCheck));
        assert!(!v03.supports(ApiFeature::ConsistentVersionCheck));

        assert!(!v02.supports(ApiFeature::ExclusiveVersionKeys));
        assert!(v03.supports(ApiFeature::ExclusiveVersionKeys));
        assert!(v05.supports(ApiFeature::ExclusiveVersionKeys));

        assert!(v03.supports(ApiFeature::TopLevelVersionDeprecated));
        assert!(!v04.supports(ApiFeature::TopLevelVersionRejected));
        assert!(v05.supports(ApiFeature::TopLevelVersionRejected));

        for feature in [
            ApiFeature::BuildToml,
            ApiFeature::SplitBoms,
            ApiFeature::EnvDirDefaultOverride,
        ] {
            assert!(!v04.supports(feature));
            assert!(v05.supports(feature));
            assert!(v06.supports(feature));
        }
    }
}
