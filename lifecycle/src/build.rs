//! The build phase.
//!
//! The selected group runs strictly in order: each buildpack's build
//! executable is handed the plan entries it provides, its build layers feed
//! the environment of every later buildpack, and its output files are merged
//! into the final build metadata.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use lifecycle_common::{read_optional_toml_file, read_toml_file, write_toml_file, TomlFileError};
use lifecycle_data::api::{ApiFeature, BuildpackApi};
use lifecycle_data::bom::BomEntry;
use lifecycle_data::build::BuildToml;
use lifecycle_data::build_plan::BuildPlan;
use lifecycle_data::buildpack::{escape_id, BuildpackGroup, GroupBuildpack};
use lifecycle_data::buildpack_plan::BuildpackPlan;
use lifecycle_data::launch::{Label, LaunchToml, Process, Slice};
use lifecycle_data::layer::LayerContentMetadata;
use serde::Serialize;

use crate::command::run_with_streams;
use crate::env::{ActionType, BuildEnv};
use crate::store::{BuildpackStore, StoreError, StoredBuildpack};
use crate::{util, ENV_BUILDPACK_DIR};

/// Directories and writers for a build pass.
pub struct BuildConfig<'a> {
    pub app_dir: PathBuf,
    pub platform_dir: PathBuf,
    pub layers_dir: PathBuf,
    /// Receives the stdout of every build child.
    pub out: &'a mut (dyn Write + Send),
    /// Receives the stderr of every build child.
    pub err: &'a mut (dyn Write + Send),
}

/// Drives the build executables of a detected group, in group order.
pub struct Builder<'a> {
    pub group: BuildpackGroup,
    pub plan: BuildPlan,
    pub store: &'a BuildpackStore,
    pub env: &'a mut dyn BuildEnv,
    pub config: BuildConfig<'a>,
}

/// One buildpack's contribution to the build.
#[derive(Debug, Default)]
pub struct BuildResult {
    pub bom: Vec<BomEntry>,
    pub build_bom: Vec<BomEntry>,
    pub labels: Vec<Label>,
    pub met_requires: Vec<String>,
    pub processes: Vec<Process>,
    pub slices: Vec<Slice>,
}

/// The merged output of a build pass, serialized by the platform.
#[derive(Serialize, Debug, Default)]
pub struct BuildMetadata {
    pub processes: Vec<Process>,
    pub buildpacks: Vec<GroupBuildpack>,
    pub bom: Vec<BomEntry>,
    #[serde(rename = "build-bom", skip_serializing_if = "Vec::is_empty")]
    pub build_bom: Vec<BomEntry>,
    pub labels: Vec<Label>,
    pub slices: Vec<Slice>,
}

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    /// A build executable exited with a non-zero status.
    #[error("buildpack '{id}' build failed with exit code {code}")]
    Buildpack { id: String, code: i32 },

    /// A buildpack's output violated the contract for its API version.
    #[error("buildpack '{id}': {message}")]
    Validation { id: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("reading/writing buildpack files: {0}")]
    TomlFile(#[from] TomlFileError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Builder<'_> {
    /// Runs every buildpack of the group and merges their contributions.
    ///
    /// Environment mutations of buildpack `i` are visible to every later
    /// buildpack; the plan shrinks as requirements are met, so a dependency
    /// is only ever handed to buildpacks that still have it open.
    pub fn build(&mut self) -> Result<BuildMetadata, BuildError> {
        let mut plan = self.plan.clone();
        let mut processes = ProcessMap::new();
        let mut bom = Vec::new();
        let mut build_bom = Vec::new();
        let mut labels = Vec::new();
        let mut slices = Vec::new();
        let mut buildpacks = Vec::new();

        let group = self.group.group.clone();
        for buildpack in &group {
            let stored = self.store.lookup(&buildpack.id, &buildpack.version)?;
            log::debug!("Running build for buildpack {buildpack}");

            let buildpack_plan = plan.find(&buildpack.id);
            let result = self.run_build(buildpack, &stored, buildpack_plan)?;

            for met in &result.met_requires {
                if !plan.provides(&buildpack.id, met) {
                    return Err(BuildError::Validation {
                        id: buildpack.id.clone(),
                        message: format!(
                            "met requirement '{met}' does not match a dependency this buildpack provides"
                        ),
                    });
                }
            }
            plan = plan.filter(&result.met_requires);

            processes.add(result.processes);
            bom.extend(result.bom);
            build_bom.extend(result.build_bom);
            labels.extend(result.labels);
            slices.extend(result.slices);
            buildpacks.push(buildpack.clone().no_opt().no_api().no_homepage());
        }

        Ok(BuildMetadata {
            processes: processes.list(),
            buildpacks,
            bom,
            build_bom,
            labels,
            slices,
        })
    }

    fn run_build(
        &mut self,
        buildpack: &GroupBuildpack,
        stored: &StoredBuildpack,
        mut buildpack_plan: BuildpackPlan,
    ) -> Result<BuildResult, BuildError> {
        let api = stored.descriptor.api();
        let info = stored.descriptor.buildpack();

        let app_dir = util::absolute(&self.config.app_dir)?;
        let platform_dir = util::absolute(&self.config.platform_dir)?;
        let layers_dir = util::absolute(&self.config.layers_dir)?;

        let buildpack_layers_dir = layers_dir.join(escape_id(&buildpack.id));
        fs::create_dir_all(&buildpack_layers_dir)?;

        // Buildpacks on API revisions that still accept top-level versions
        // get the version mirrored up from the metadata in the plan they are
        // handed; their output is canonicalized back afterwards.
        if !api.supports(ApiFeature::TopLevelVersionRejected) {
            for entry in &mut buildpack_plan.entries {
                entry.convert_metadata_to_version();
            }
        }

        let plan_dir = tempfile::Builder::new()
            .prefix(&format!("{}-", escape_id(&buildpack.id)))
            .tempdir()?;
        let plan_path = plan_dir.path().join("plan.toml");
        write_toml_file(&buildpack_plan, &plan_path)?;
        let plan_bytes = fs::read(&plan_path)?;

        let build_env = if info.clear_env {
            self.env.with_platform(&platform_dir)?
        } else {
            self.env.list()
        };

        let mut command = Command::new(stored.dir.join("bin").join("build"));
        command
            .arg(&platform_dir)
            .arg(&plan_path)
            .arg(&buildpack_layers_dir)
            .current_dir(&app_dir)
            .env_clear()
            .envs(build_env)
            .env(ENV_BUILDPACK_DIR, &stored.dir);

        let status = run_with_streams(
            &mut command,
            Some(&plan_bytes),
            &mut *self.config.out,
            &mut *self.config.err,
        )?;
        if !status.success() {
            return Err(BuildError::Buildpack {
                id: buildpack.id.clone(),
                code: status.code().unwrap_or(-1),
            });
        }

        self.setup_env(&buildpack_layers_dir, api)?;

        if api.supports(ApiFeature::SplitBoms) {
            read_output_files(buildpack, &buildpack_layers_dir, &buildpack_plan)
        } else {
            read_output_plan(buildpack, &buildpack_layers_dir, &plan_path)
        }
    }

    /// Applies the environment contributions of every `build = true` layer:
    /// first all layer roots, then the `env` and `env.build` dirs per layer.
    fn setup_env(
        &mut self,
        buildpack_layers_dir: &Path,
        api: BuildpackApi,
    ) -> Result<(), BuildError> {
        let action = if api.supports(ApiFeature::EnvDirDefaultOverride) {
            ActionType::Override
        } else {
            ActionType::PrependPath
        };

        let layer_dirs = build_layer_dirs(buildpack_layers_dir, api)?;

        for layer_dir in &layer_dirs {
            self.env.add_root_dir(layer_dir)?;
        }
        for layer_dir in &layer_dirs {
            self.env.add_env_dir(&layer_dir.join("env"), action)?;
            self.env.add_env_dir(&layer_dir.join("env.build"), action)?;
        }

        Ok(())
    }
}

/// The layer directories of a buildpack whose descriptors declare
/// `build = true`, in layer name order.
fn build_layer_dirs(
    buildpack_layers_dir: &Path,
    api: BuildpackApi,
) -> Result<Vec<PathBuf>, BuildError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(buildpack_layers_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let (Some(stem), Some("toml")) = (
            path.file_stem().and_then(std::ffi::OsStr::to_str),
            path.extension().and_then(std::ffi::OsStr::to_str),
        ) {
            names.push(String::from(stem));
        }
    }
    names.sort();

    let mut layer_dirs = Vec::new();
    for name in names {
        if name == "launch" || name == "store" {
            continue;
        }
        if name == "build" && api.supports(ApiFeature::BuildToml) {
            continue;
        }
        let metadata: LayerContentMetadata =
            read_toml_file(buildpack_layers_dir.join(format!("{name}.toml")))?;
        if metadata.build {
            layer_dirs.push(buildpack_layers_dir.join(name));
        }
    }
    Ok(layer_dirs)
}

/// Reads the output files of a buildpack on API 0.5 or later: the launch BOM,
/// processes, labels and slices from `launch.toml`, the build BOM and unmet
/// requirements from `build.toml`.
fn read_output_files(
    buildpack: &GroupBuildpack,
    buildpack_layers_dir: &Path,
    buildpack_plan: &BuildpackPlan,
) -> Result<BuildResult, BuildError> {
    let launch: LaunchToml =
        read_optional_toml_file(buildpack_layers_dir.join("launch.toml"))?.unwrap_or_default();
    let build_toml: BuildToml =
        read_optional_toml_file(buildpack_layers_dir.join("build.toml"))?.unwrap_or_default();

    validate_bom(&launch.bom, buildpack)?;
    validate_bom(&build_toml.bom, buildpack)?;

    let mut unmet_names = Vec::new();
    for unmet in &build_toml.unmet {
        if unmet.name.is_empty() {
            return Err(BuildError::Validation {
                id: buildpack.id.clone(),
                message: String::from("unmet.name is required"),
            });
        }
        if !buildpack_plan.names().any(|name| name == unmet.name) {
            return Err(BuildError::Validation {
                id: buildpack.id.clone(),
                message: format!(
                    "unmet name '{}' must match a requested dependency",
                    unmet.name
                ),
            });
        }
        unmet_names.push(unmet.name.clone());
    }

    let met_requires = buildpack_plan
        .names()
        .filter(|name| !unmet_names.iter().any(|unmet| unmet == name))
        .map(String::from)
        .collect();

    Ok(BuildResult {
        bom: stamp_bom(launch.bom, buildpack),
        build_bom: stamp_bom(build_toml.bom, buildpack),
        labels: launch.labels,
        met_requires,
        processes: launch.processes,
        slices: launch.slices,
    })
}

/// Reads the output of a buildpack below API 0.5: the plan file it was handed
/// supersedes the input plan, its entries become both the BOM contribution
/// and the met requirements. `launch.toml` contributes processes, labels and
/// slices only.
fn read_output_plan(
    buildpack: &GroupBuildpack,
    buildpack_layers_dir: &Path,
    plan_path: &Path,
) -> Result<BuildResult, BuildError> {
    let mut plan_out: BuildpackPlan = read_optional_toml_file(plan_path)?.unwrap_or_default();

    let mut met_requires = Vec::new();
    let mut bom = Vec::new();
    for entry in &mut plan_out.entries {
        if entry.has_inconsistent_versions() {
            return Err(BuildError::Validation {
                id: buildpack.id.clone(),
                message: format!(
                    "plan entry '{}': top level version does not match metadata version",
                    entry.name
                ),
            });
        }
        entry.convert_version_to_metadata();
        met_requires.push(entry.name.clone());
        bom.push(BomEntry {
            require: entry.clone(),
            buildpack: None,
        });
    }

    let launch: LaunchToml =
        read_optional_toml_file(buildpack_layers_dir.join("launch.toml"))?.unwrap_or_default();

    Ok(BuildResult {
        bom: stamp_bom(bom, buildpack),
        build_bom: Vec::new(),
        labels: launch.labels,
        met_requires,
        processes: launch.processes,
        slices: launch.slices,
    })
}

fn validate_bom(bom: &[BomEntry], buildpack: &GroupBuildpack) -> Result<(), BuildError> {
    for entry in bom {
        if entry.require.has_top_level_versions() {
            return Err(BuildError::Validation {
                id: buildpack.id.clone(),
                message: format!(
                    "bom entry '{}' has a top level version which is not allowed",
                    entry.require.name
                ),
            });
        }
    }
    Ok(())
}

fn stamp_bom(bom: Vec<BomEntry>, buildpack: &GroupBuildpack) -> Vec<BomEntry> {
    bom.into_iter()
        .map(|entry| entry.with_buildpack(buildpack))
        .collect()
}

/// Processes keyed by type: later buildpacks overwrite earlier types, the
/// final listing is in ascending type order.
#[derive(Default)]
struct ProcessMap(BTreeMap<String, Process>);

impl ProcessMap {
    fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, processes: Vec<Process>) {
        for process in processes {
            self.0.insert(process.r#type.clone(), process);
        }
    }

    fn list(self) -> Vec<Process> {
        self.0.into_values().collect()
    }
}
