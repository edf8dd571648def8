//! The detect phase.
//!
//! Detection walks an ordered tree of candidate groups, expanding composite
//! buildpacks in place, and evaluates one concrete group at a time: every
//! leaf's detect executable runs in its own child process (memoized per
//! `id@version` across the whole search), and the group's provides/requires
//! output is resolved into a build plan by trying plan alternatives in order
//! and dropping optional buildpacks whose claims cannot be satisfied.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Mutex, PoisonError};
use std::thread;

use lifecycle_common::read_toml_file;
use lifecycle_data::api::{ApiFeature, BuildpackApi};
use lifecycle_data::build_plan::{BuildPlan, BuildPlanEntry, DetectPlan, PlanSections, Require};
use lifecycle_data::buildpack::{BuildpackGroup, GroupBuildpack};

use crate::env::Env;
use crate::store::{BuildpackStore, StoreError, StoredBuildpack};
use crate::{util, ENV_BUILDPACK_DIR};

pub const CODE_DETECT_PASS: i32 = 0;
pub const CODE_DETECT_FAIL: i32 = 100;

/// The inputs of a detection pass.
pub struct DetectConfig {
    pub app_dir: PathBuf,
    pub platform_dir: PathBuf,
    /// Environment for buildpacks that see the full process environment.
    pub full_env: Env,
    /// Environment for buildpacks that declare `clear-env`.
    pub clear_env: Env,
}

/// The recorded outcome of a single detect executable.
#[derive(Debug, Clone)]
pub struct DetectRun {
    /// The child's exit status: 0 passes, 100 fails, anything else is an
    /// error. Contract violations in an otherwise passing run are recorded
    /// as -1.
    pub code: i32,
    pub plan: DetectPlan,
    /// Combined stdout and stderr, kept for diagnostics.
    pub output: Vec<u8>,
    pub err: Option<String>,
}

impl DetectRun {
    fn error(err: String) -> Self {
        Self {
            code: -1,
            plan: DetectPlan::default(),
            output: Vec::new(),
            err: Some(err),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DetectError {
    /// The search space is exhausted and no child errored.
    #[error("no buildpacks participating")]
    FailedDetection,

    /// The search space is exhausted and at least one detect executable
    /// exited with an unexpected code. Dominates [`DetectError::FailedDetection`].
    #[error("buildpack(s) failed with err")]
    Buildpack,

    /// A composite buildpack appeared again inside its own expansion.
    #[error("cyclic reference to buildpack '{0}' in order")]
    CyclicOrder(String),

    #[error("missing detection of '{0}'")]
    MissingRun(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Runs detection over an order, owning the per-pass memoization of detect
/// runs. A `Detector` is good for a single detection pass; its runs map dies
/// with it.
pub struct Detector<'a> {
    config: DetectConfig,
    store: &'a BuildpackStore,
    runs: Mutex<HashMap<String, DetectRun>>,
}

impl<'a> Detector<'a> {
    pub fn new(config: DetectConfig, store: &'a BuildpackStore) -> Self {
        Self {
            config,
            store,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DetectConfig {
        &self.config
    }

    /// Detects the first satisfiable group of the order and resolves its
    /// build plan. Every require in the returned plan is in canonical
    /// metadata form.
    pub fn detect(
        &self,
        order: &[BuildpackGroup],
    ) -> Result<(BuildpackGroup, BuildPlan), DetectError> {
        let (group, mut entries) = self.detect_order(order, &[], &[], false, &[])?;
        for entry in &mut entries {
            for require in &mut entry.requires {
                require.convert_version_to_metadata();
            }
        }
        Ok((BuildpackGroup { group }, BuildPlan { entries }))
    }

    fn detect_order(
        &self,
        order: &[BuildpackGroup],
        done: &[GroupBuildpack],
        next: &[GroupBuildpack],
        optional: bool,
        expanding: &[String],
    ) -> Result<(Vec<GroupBuildpack>, Vec<BuildPlanEntry>), DetectError> {
        let mut buildpack_err = false;
        for group in order {
            let mut candidate = group.group.clone();
            candidate.extend_from_slice(next);
            match self.detect_group(&candidate, done, expanding) {
                Err(DetectError::Buildpack) => buildpack_err = true,
                Err(DetectError::FailedDetection) => {}
                other => return other,
            }
        }

        // An optional composite that found no viable group falls through to
        // the continuation: the enclosing group without the composite.
        if optional {
            return self.detect_group(next, done, expanding);
        }

        if buildpack_err {
            Err(DetectError::Buildpack)
        } else {
            Err(DetectError::FailedDetection)
        }
    }

    fn detect_group(
        &self,
        group: &[GroupBuildpack],
        done: &[GroupBuildpack],
        expanding: &[String],
    ) -> Result<(Vec<GroupBuildpack>, Vec<BuildPlanEntry>), DetectError> {
        let mut done = done.to_vec();
        for (index, buildpack) in group.iter().enumerate() {
            if done.iter().any(|seen| seen.id == buildpack.id) {
                continue;
            }

            let stored = self.store.lookup(&buildpack.id, &buildpack.version)?;
            let mut buildpack = buildpack.clone();
            buildpack.api = Some(stored.descriptor.api());
            buildpack.homepage = stored.descriptor.buildpack().homepage.clone();

            if let Some(order) = stored.descriptor.order() {
                // A composite expands in place: each of its groups is tried
                // with the remaining members of this group as continuation.
                // The expansion path bounds recursion depth.
                let reference = buildpack.to_string();
                if expanding.iter().any(|seen| *seen == reference) {
                    return Err(DetectError::CyclicOrder(reference));
                }
                let mut expanding = expanding.to_vec();
                expanding.push(reference);
                return self.detect_order(
                    order,
                    &done,
                    &group[index + 1..],
                    buildpack.optional,
                    &expanding,
                );
            }

            done.push(buildpack);
        }

        self.run_detects(&done)?;
        self.process(&done)
    }

    /// Spawns detect children for every group member without a memoized run
    /// and waits for all of them. Which keys spawn is decided up front, so at
    /// most one invocation per `id@version` ever exists; the thread scope is
    /// the barrier that keeps the engine from returning while children run.
    fn run_detects(&self, done: &[GroupBuildpack]) -> Result<(), DetectError> {
        let mut pending: Vec<(String, std::sync::Arc<StoredBuildpack>)> = Vec::new();
        {
            let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
            for buildpack in done {
                let key = buildpack.to_string();
                if !runs.contains_key(&key) && !pending.iter().any(|(seen, _)| *seen == key) {
                    pending.push((key, self.store.lookup(&buildpack.id, &buildpack.version)?));
                }
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let results = thread::scope(|scope| {
            let handles = pending
                .iter()
                .map(|(key, stored)| (key, scope.spawn(|| self.run_detect(stored))))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|(key, handle)| match handle.join() {
                    Ok(run) => (key.clone(), run),
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect::<Vec<_>>()
        });

        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, run) in results {
            runs.entry(key).or_insert(run);
        }
        Ok(())
    }

    fn run_detect(&self, stored: &StoredBuildpack) -> DetectRun {
        let info = stored.descriptor.buildpack();

        let app_dir = match util::absolute(&self.config.app_dir) {
            Ok(dir) => dir,
            Err(error) => return DetectRun::error(error.to_string()),
        };
        let platform_dir = match util::absolute(&self.config.platform_dir) {
            Ok(dir) => dir,
            Err(error) => return DetectRun::error(error.to_string()),
        };

        // The plan file lives in a directory unique to this invocation and is
        // removed with it, pass or fail.
        let plan_dir = match tempfile::Builder::new().prefix("plan.").tempdir() {
            Ok(dir) => dir,
            Err(error) => return DetectRun::error(error.to_string()),
        };
        let plan_path = plan_dir.path().join("plan.toml");
        if let Err(error) = fs::write(&plan_path, []) {
            return DetectRun::error(error.to_string());
        }

        let env = if info.clear_env {
            &self.config.clear_env
        } else {
            &self.config.full_env
        };

        let output = match Command::new(stored.dir.join("bin").join("detect"))
            .arg(&platform_dir)
            .arg(&plan_path)
            .current_dir(&app_dir)
            .env_clear()
            .envs(env)
            .env(ENV_BUILDPACK_DIR, &stored.dir)
            .output()
        {
            Ok(output) => output,
            Err(error) => return DetectRun::error(error.to_string()),
        };

        let mut captured = output.stdout;
        captured.extend_from_slice(&output.stderr);

        if !output.status.success() {
            return match output.status.code() {
                Some(code) => DetectRun {
                    code,
                    plan: DetectPlan::default(),
                    output: captured,
                    err: None,
                },
                None => DetectRun {
                    code: -1,
                    plan: DetectPlan::default(),
                    output: captured,
                    err: Some(String::from("terminated by signal")),
                },
            };
        }

        let plan = match read_toml_file::<DetectPlan>(&plan_path) {
            Ok(plan) => plan,
            Err(error) => return DetectRun::error(error.to_string()),
        };

        let mut run = DetectRun {
            code: CODE_DETECT_PASS,
            plan,
            output: captured,
            err: None,
        };
        if let Err(message) = validate_detect_plan(&run.plan, stored.descriptor.api(), &info.id) {
            run.code = -1;
            run.err = Some(message);
        }
        run
    }

    fn process(
        &self,
        done: &[GroupBuildpack],
    ) -> Result<(Vec<GroupBuildpack>, Vec<BuildPlanEntry>), DetectError> {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);

        let mut results = Vec::new();
        let mut detected = true;
        let mut buildpack_err = false;

        for buildpack in done {
            let key = buildpack.to_string();
            let run = runs
                .get(&key)
                .ok_or(DetectError::MissingRun(key))?
                .clone();

            if !run.output.is_empty() {
                let output = String::from_utf8_lossy(&run.output);
                if run.code == CODE_DETECT_PASS || run.code == CODE_DETECT_FAIL {
                    log::debug!("======== Output: {buildpack} ========\n{output}");
                } else {
                    log::info!("======== Output: {buildpack} ========\n{output}");
                }
            }
            if let Some(err) = &run.err {
                log::info!("======== Error: {buildpack} ========\n{err}");
            }

            match run.code {
                CODE_DETECT_PASS => {
                    log::debug!("pass: {buildpack}");
                    results.push(DetectResult {
                        buildpack: buildpack.clone(),
                        run,
                    });
                }
                CODE_DETECT_FAIL => {
                    if buildpack.optional {
                        log::debug!("skip: {buildpack}");
                    } else {
                        log::debug!("fail: {buildpack}");
                    }
                    detected = detected && buildpack.optional;
                }
                code => {
                    if code == -1 {
                        log::info!("err:  {buildpack}");
                    } else {
                        log::info!("err:  {buildpack} ({code})");
                    }
                    buildpack_err = true;
                    detected = detected && buildpack.optional;
                }
            }
        }
        drop(runs);

        if !detected {
            return Err(if buildpack_err {
                DetectError::Buildpack
            } else {
                DetectError::FailedDetection
            });
        }

        let (deps, trial) = run_trials(&results)?;

        if done.len() != trial.len() {
            log::info!("{} of {} buildpacks participating", trial.len(), done.len());
        }
        for option in &trial {
            log::info!("{} {}", option.buildpack.id, option.buildpack.version);
        }

        let found = trial
            .into_iter()
            .map(|option| option.buildpack.no_opt())
            .collect();
        Ok((found, deps.into_entries()))
    }
}

fn validate_detect_plan(
    plan: &DetectPlan,
    api: BuildpackApi,
    buildpack_id: &str,
) -> Result<(), String> {
    if api.supports(ApiFeature::ConsistentVersionCheck) && plan.has_inconsistent_versions() {
        return Err(format!(
            r#"buildpack {buildpack_id} has a "version" key that does not match "metadata.version""#
        ));
    }
    if api.supports(ApiFeature::ExclusiveVersionKeys) && plan.has_doubly_specified_versions() {
        return Err(format!(
            r#"buildpack {buildpack_id} has a "version" key and a "metadata.version" which cannot be specified together. "metadata.version" should be used instead"#
        ));
    }
    if plan.has_top_level_versions() {
        if api.supports(ApiFeature::TopLevelVersionRejected) {
            return Err(format!(
                r#"buildpack {buildpack_id} has a "version" key which is not supported in buildpack API {api}. "metadata.version" must be used instead"#
            ));
        }
        if api.supports(ApiFeature::TopLevelVersionDeprecated) {
            log::warn!(
                r#"buildpack {buildpack_id} has a "version" key. This key is deprecated in build plan requirements in buildpack API 0.3. "metadata.version" should be used instead"#
            );
        }
    }
    Ok(())
}

struct DetectResult {
    buildpack: GroupBuildpack,
    run: DetectRun,
}

impl DetectResult {
    /// The plan alternatives of this buildpack, in preference order. Choosing
    /// an `or` alternative is a commitment, so only the last option keeps the
    /// buildpack's `optional` flag.
    fn options(&self) -> Vec<DetectOption> {
        let mut sections = vec![self.run.plan.sections.clone()];
        sections.extend(self.run.plan.or.iter().cloned());
        let last = sections.len() - 1;
        sections
            .into_iter()
            .enumerate()
            .map(|(index, sections)| {
                let mut buildpack = self.buildpack.clone();
                buildpack.optional = buildpack.optional && index == last;
                DetectOption {
                    buildpack,
                    sections,
                }
            })
            .collect()
    }
}

#[derive(Clone)]
struct DetectOption {
    buildpack: GroupBuildpack,
    sections: PlanSections,
}

/// Tries every combination of plan options in enumeration order; the first
/// trial that resolves wins.
fn run_trials(results: &[DetectResult]) -> Result<(DepMap, Vec<DetectOption>), DetectError> {
    let mut attempt = 0;
    run_trials_from(results, &mut Vec::new(), &mut attempt)
}

fn run_trials_from(
    results: &[DetectResult],
    prefix: &mut Vec<DetectOption>,
    attempt: &mut usize,
) -> Result<(DepMap, Vec<DetectOption>), DetectError> {
    let Some((head, rest)) = results.split_first() else {
        *attempt += 1;
        log::debug!("Resolving plan... (try #{attempt})");
        return run_trial(prefix.clone());
    };

    let mut last_err = DetectError::FailedDetection;
    for option in head.options() {
        prefix.push(option);
        let outcome = run_trials_from(rest, prefix, attempt);
        prefix.pop();
        match outcome {
            Ok(resolved) => return Ok(resolved),
            Err(error) => last_err = error,
        }
    }
    Err(last_err)
}

/// Resolves one trial to a fixed point: requirements that precede every
/// provider and provides that nothing consumes fail the trial unless the
/// offending buildpack is optional, in which case it is dropped and the
/// trial re-resolved.
fn run_trial(mut trial: Vec<DetectOption>) -> Result<(DepMap, Vec<DetectOption>), DetectError> {
    loop {
        let deps = DepMap::new(&trial);
        let mut dropped = false;

        for (name, buildpack) in deps.unmet_requires() {
            if !buildpack.optional {
                log::debug!("fail: {buildpack} requires {name}");
                return Err(DetectError::FailedDetection);
            }
            log::debug!("skip: {buildpack} requires {name}");
            trial.retain(|option| option.buildpack != *buildpack);
            dropped = true;
        }

        for (name, buildpack) in deps.unmet_provides() {
            if !buildpack.optional {
                log::debug!("fail: {buildpack} provides unused {name}");
                return Err(DetectError::FailedDetection);
            }
            log::debug!("skip: {buildpack} provides unused {name}");
            trial.retain(|option| option.buildpack != *buildpack);
            dropped = true;
        }

        if !dropped {
            if trial.is_empty() {
                log::debug!("fail: no viable buildpacks in group");
                return Err(DetectError::FailedDetection);
            }
            return Ok((deps, trial));
        }
    }
}

#[derive(Default)]
struct DepEntry {
    providers: Vec<GroupBuildpack>,
    requires: Vec<Require>,
    early_requires: Vec<GroupBuildpack>,
    extra_provides: Vec<GroupBuildpack>,
}

/// Dependency names to their resolution state, built by streaming a trial in
/// group order. A provide only counts once a later require consumes it; a
/// require only counts if some provide precedes it.
struct DepMap(BTreeMap<String, DepEntry>);

impl DepMap {
    fn new(trial: &[DetectOption]) -> Self {
        let mut map: BTreeMap<String, DepEntry> = BTreeMap::new();

        for option in trial {
            for provide in &option.sections.provides {
                map.entry(provide.name.clone())
                    .or_default()
                    .extra_provides
                    .push(option.buildpack.clone());
            }
            for require in &option.sections.requires {
                let entry = map.entry(require.name.clone()).or_default();
                let pending = std::mem::take(&mut entry.extra_provides);
                entry.providers.extend(pending);
                if entry.providers.is_empty() {
                    entry.early_requires.push(option.buildpack.clone());
                } else {
                    entry.requires.push(require.clone());
                }
            }
        }

        Self(map)
    }

    fn unmet_requires(&self) -> impl Iterator<Item = (&str, &GroupBuildpack)> {
        self.0.iter().flat_map(|(name, entry)| {
            entry
                .early_requires
                .iter()
                .map(move |buildpack| (name.as_str(), buildpack))
        })
    }

    fn unmet_provides(&self) -> impl Iterator<Item = (&str, &GroupBuildpack)> {
        self.0.iter().flat_map(|(name, entry)| {
            entry
                .extra_provides
                .iter()
                .map(move |buildpack| (name.as_str(), buildpack))
        })
    }

    fn into_entries(self) -> Vec<BuildPlanEntry> {
        self.0
            .into_values()
            .filter(|entry| !entry.providers.is_empty())
            .map(|entry| {
                BuildPlanEntry {
                    providers: entry.providers,
                    requires: entry.requires,
                }
                .no_opt()
            })
            .collect()
    }
}
