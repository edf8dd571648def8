use serde::{Deserialize, Serialize};

use crate::build_plan::Require;

/// The plan handed to a single buildpack's build executable: the requirements
/// it is expected to fulfill.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct BuildpackPlan {
    #[serde(default)]
    pub entries: Vec<Require>,
}

impl BuildpackPlan {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_empty() {
        let plan = toml::from_str::<BuildpackPlan>("").unwrap();
        assert_eq!(plan.entries, []);
    }

    #[test]
    fn it_parses_entries_with_metadata() {
        let plan = toml::from_str::<BuildpackPlan>(
            r#"
[[entries]]
name = "rust"
    [entries.metadata]
    version = "1.66"
"#,
        )
        .unwrap();

        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].name, "rust");
        assert_eq!(
            plan.entries[0].metadata.get("version"),
            Some(&toml::Value::String(String::from("1.66")))
        );
    }

    #[test]
    fn names_iterates_in_entry_order() {
        let plan = BuildpackPlan {
            entries: vec![Require::new("b"), Require::new("a")],
        };

        assert_eq!(plan.names().collect::<Vec<_>>(), ["b", "a"]);
    }
}
