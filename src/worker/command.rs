use std::path::{Path, PathBuf};

use crate::config::{
    OrchestratorConfig, WORKER_NAME_PREFIX, WORKER_OUTPUT_MOUNT, WORKER_SCRIPTS_MOUNT,
    WORKER_SCRIPT_PATH,
};
use crate::encoder::{self, EncodedConfig, ENV_TARGET_URL};
use crate::model::{ArtifactKey, ArtifactKind, RunId, TestConfiguration};

/// A fully resolved worker invocation: what to exec, with which arguments,
/// and which environment variables to add.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: EncodedConfig,
}

/// Everything needed to build container invocations, lifted out of the
/// server config so commands can be built without one.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub docker_bin: String,
    pub load_image: String,
    pub audit_image: String,
    pub scripts_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl WorkerSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            docker_bin: config.docker_bin.clone(),
            load_image: config.load_image.clone(),
            audit_image: config.audit_image.clone(),
            scripts_dir: config.scripts_dir.clone(),
            output_dir: config.output_dir.clone(),
        }
    }
}

/// Container name unique to this launch. The random suffix keeps a retried
/// launch for the same run from colliding with one still alive.
pub fn worker_name(run_id: &RunId, kind: ArtifactKind) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}-{}", WORKER_NAME_PREFIX, kind, run_id, &suffix[..8])
}

/// Path of the artifact as seen from inside the container.
pub fn container_output_path(key: &ArtifactKey) -> String {
    format!("{}/{}", WORKER_OUTPUT_MOUNT, key.file_name())
}

impl WorkerCommand {
    /// `docker run` of the load generator. Parameters travel as `-e NAME`
    /// flags without values, so docker forwards them from its own
    /// environment and the values never show up in the process list.
    pub fn load_test(
        settings: &WorkerSettings,
        run_id: &RunId,
        config: &TestConfiguration,
    ) -> Self {
        let env = encoder::encode(config);
        let key = ArtifactKey::new(run_id.clone(), ArtifactKind::Load);
        let name = worker_name(run_id, ArtifactKind::Load);

        let mut args = docker_run_prefix(&name);
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}:ro",
            absolute(&settings.scripts_dir).display(),
            WORKER_SCRIPTS_MOUNT
        ));
        args.push("-v".to_string());
        args.push(output_volume(settings));
        for var in env.keys() {
            args.push("-e".to_string());
            args.push(var.clone());
        }
        args.push(settings.load_image.clone());
        args.extend([
            "run".to_string(),
            "--summary-export".to_string(),
            container_output_path(&key),
            WORKER_SCRIPT_PATH.to_string(),
        ]);

        Self {
            name,
            program: settings.docker_bin.clone(),
            args,
            env,
        }
    }

    /// `docker run` of the audit tool, writing its JSON report straight
    /// into the shared output directory.
    pub fn audit(settings: &WorkerSettings, run_id: &RunId, config: &TestConfiguration) -> Self {
        let key = ArtifactKey::new(run_id.clone(), ArtifactKind::Audit);
        let name = worker_name(run_id, ArtifactKind::Audit);

        let mut env = EncodedConfig::new();
        env.insert(ENV_TARGET_URL.to_string(), config.url.clone());

        let mut args = docker_run_prefix(&name);
        args.push("-v".to_string());
        args.push(output_volume(settings));
        args.push(settings.audit_image.clone());
        args.extend([
            config.url.clone(),
            "--output=json".to_string(),
            format!("--output-path={}", container_output_path(&key)),
            "--only-categories=performance,accessibility,best-practices,seo".to_string(),
            "--chrome-flags=--headless --no-sandbox".to_string(),
            "--quiet".to_string(),
        ]);

        Self {
            name,
            program: settings.docker_bin.clone(),
            args,
            env,
        }
    }
}

fn docker_run_prefix(name: &str) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        name.to_string(),
    ]
}

fn output_volume(settings: &WorkerSettings) -> String {
    format!(
        "{}:{}",
        absolute(&settings.output_dir).display(),
        WORKER_OUTPUT_MOUNT
    )
}

// Docker only accepts absolute host paths for bind mounts.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
