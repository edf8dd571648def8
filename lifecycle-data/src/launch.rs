use serde::{Deserialize, Serialize};

use crate::bom::BomEntry;

/// The `launch.toml` file a buildpack writes into its layers directory.
#[derive(Deserialize, Debug, Default)]
pub struct LaunchToml {
    #[serde(default)]
    pub bom: Vec<BomEntry>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub processes: Vec<Process>,
    #[serde(default)]
    pub slices: Vec<Slice>,
}

/// A process type contributed by a buildpack.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Process {
    pub r#type: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub direct: bool,
}

impl Process {
    #[must_use]
    pub fn new(r#type: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            command: command.into(),
            args: Vec::new(),
            direct: false,
        }
    }
}

/// An image label contributed by a buildpack.
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
pub struct Label {
    pub key: String,
    pub value: String,
}

/// A slice of application files to be exported as a separate layer.
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
pub struct Slice {
    pub paths: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_a_full_launch_file() {
        let launch: LaunchToml = toml::from_str(
            r#"
[[bom]]
name = "ruby"
[bom.metadata]
version = "2.7.1"

[[labels]]
key = "maintainer"
value = "example"

[[processes]]
type = "web"
command = "bundle"
args = ["exec", "rackup"]
direct = true

[[slices]]
paths = ["public/assets"]
"#,
        )
        .unwrap();

        assert_eq!(launch.bom.len(), 1);
        assert_eq!(launch.bom[0].require.name, "ruby");
        assert_eq!(
            launch.labels,
            [Label {
                key: String::from("maintainer"),
                value: String::from("example")
            }]
        );
        assert_eq!(
            launch.processes,
            [Process {
                args: vec![String::from("exec"), String::from("rackup")],
                direct: true,
                ..Process::new("web", "bundle")
            }]
        );
        assert_eq!(
            launch.slices,
            [Slice {
                paths: vec![String::from("public/assets")]
            }]
        );
    }

    #[test]
    fn it_parses_empty_launch_files() {
        let launch: LaunchToml = toml::from_str("").unwrap();

        assert!(launch.bom.is_empty());
        assert!(launch.labels.is_empty());
        assert!(launch.processes.is_empty());
        assert!(launch.slices.is_empty());
    }
}
