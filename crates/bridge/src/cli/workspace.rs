//! Per-resource working directories for the provider CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, info, warn};

use skyjet_core::{format_uid, EngineConfig, Error, Result, Uid};
use skyjet_value::ResourceSchema;

pub const MAIN_FILE: &str = "main.tf.json";
pub const STATE_FILE: &str = "terraform.tfstate";
pub const PLAN_FILE: &str = "skyjet.tfplan";
pub const LOCK_FILE: &str = ".terraform.lock.hcl";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs the provider CLI. Split out so workspaces can be driven without a
/// real binary.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, dir: &Path, args: &[&str], env: &BTreeMap<String, String>) -> Result<CommandOutput>;
}

pub struct ProcessRunner {
    binary: String,
}

impl ProcessRunner {
    pub fn new(binary: impl Into<String>) -> Self { Self { binary: binary.into() } }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, dir: &Path, args: &[&str], env: &BTreeMap<String, String>) -> Result<CommandOutput> {
        let t0 = Instant::now();
        let out = tokio::process::Command::new(&self.binary)
            .args(args)
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .envs(env)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Workspace { dir: dir.display().to_string(), reason: format!("spawn {}: {e}", self.binary) })?;
        let cmd = args.first().copied().unwrap_or_default();
        metrics::histogram!("skyjet_cli_command_ms", t0.elapsed().as_secs_f64() * 1000.0, "command" => cmd.to_string());
        debug!(command = cmd, code = ?out.status.code(), took_ms = %t0.elapsed().as_millis(), "cli: command finished");
        Ok(CommandOutput {
            success: out.status.success(),
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}

/// Mutable bookkeeping guarded by the workspace lock.
#[derive(Debug, Default)]
pub struct WorkspaceState {
    pub initialized: bool,
    pub serial: u64,
}

/// One resource's working directory. CLI invocations in a workspace are
/// serialized through [`Workspace::lock`].
pub struct Workspace {
    dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
    env: BTreeMap<String, String>,
    parallelism: Option<u32>,
    state: AsyncMutex<WorkspaceState>,
}

impl Workspace {
    pub fn dir(&self) -> &Path { &self.dir }

    pub fn parallelism(&self) -> Option<u32> { self.parallelism }

    pub async fn lock(&self) -> MutexGuard<'_, WorkspaceState> { self.state.lock().await }

    fn err(&self, reason: impl ToString) -> Error {
        Error::Workspace { dir: self.dir.display().to_string(), reason: reason.to_string() }
    }

    pub async fn write_json(&self, name: &str, doc: &Json) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| self.err(e))?;
        let bytes = serde_json::to_vec_pretty(doc).map_err(|e| self.err(e))?;
        tokio::fs::write(self.dir.join(name), bytes).await.map_err(|e| self.err(format!("write {name}: {e}")))
    }

    /// `Ok(None)` when the file does not exist.
    pub async fn read_json(&self, name: &str) -> Result<Option<Json>> {
        match tokio::fs::read(self.dir.join(name)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| self.err(format!("parse {name}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.err(format!("read {name}: {e}"))),
        }
    }

    pub async fn run(&self, args: &[&str], extra_env: &BTreeMap<String, String>) -> Result<CommandOutput> {
        let mut env = self.env.clone();
        env.extend(extra_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.runner.run(&self.dir, args, &env).await
    }

    /// Run `init` unless this workspace was already initialized, here or by
    /// an earlier process.
    pub async fn ensure_init(&self, st: &mut WorkspaceState, extra_env: &BTreeMap<String, String>) -> Result<()> {
        if st.initialized { return Ok(()); }
        let marker = self.dir.join(LOCK_FILE);
        let plugins = self.dir.join(".terraform");
        if marker.exists() && plugins.exists() {
            st.initialized = true;
            return Ok(());
        }
        let t0 = Instant::now();
        let out = self.run(&["init", "-input=false", "-no-color"], extra_env).await?;
        if !out.success {
            warn!(dir = %self.dir.display(), code = ?out.code, "cli: init failed");
            return Err(Error::Setup(format!("provider init failed: {}", out.stderr.trim())));
        }
        info!(dir = %self.dir.display(), took_ms = %t0.elapsed().as_millis(), "cli: workspace initialized");
        st.initialized = true;
        Ok(())
    }
}

/// Owns every workspace under one root plus a schema cache shared by all of
/// them.
pub struct WorkspaceStore {
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
    env: BTreeMap<String, String>,
    parallelism: Option<u32>,
    workspaces: Mutex<FxHashMap<Uid, Arc<Workspace>>>,
    schemas: Mutex<BTreeMap<(String, String), ResourceSchema>>,
}

impl WorkspaceStore {
    pub fn new(root: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            root: root.into(),
            runner,
            env: BTreeMap::new(),
            parallelism: None,
            workspaces: Mutex::new(FxHashMap::default()),
            schemas: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        let mut s = Self::new(cfg.workspace_dir.clone(), Arc::new(ProcessRunner::new(cfg.cli_binary.clone())));
        if let Some(dir) = &cfg.plugin_cache_dir {
            s.env.insert("TF_PLUGIN_CACHE_DIR".to_string(), dir.display().to_string());
        }
        s.parallelism = cfg.cli_parallelism;
        s
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn workspace(&self, uid: &Uid) -> Arc<Workspace> {
        let mut g = self.workspaces.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(g.entry(*uid).or_insert_with(|| {
            Arc::new(Workspace {
                dir: self.root.join(format_uid(uid)),
                runner: Arc::clone(&self.runner),
                env: self.env.clone(),
                parallelism: self.parallelism,
                state: AsyncMutex::new(WorkspaceState::default()),
            })
        }))
    }

    /// Forget the workspace and delete its directory.
    pub async fn remove(&self, uid: &Uid) -> Result<()> {
        let removed = self.workspaces.lock().unwrap_or_else(|e| e.into_inner()).remove(uid);
        let dir = removed.map(|w| w.dir.clone()).unwrap_or_else(|| self.root.join(format_uid(uid)));
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Workspace { dir: dir.display().to_string(), reason: e.to_string() }),
        }
    }

    pub fn cached_schema(&self, source: &str, type_name: &str) -> Option<ResourceSchema> {
        let g = self.schemas.lock().unwrap_or_else(|e| e.into_inner());
        g.get(&(source.to_string(), type_name.to_string())).cloned()
    }

    pub fn cache_schema(&self, source: &str, type_name: &str, schema: ResourceSchema) {
        let mut g = self.schemas.lock().unwrap_or_else(|e| e.into_inner());
        g.insert((source.to_string(), type_name.to_string()), schema);
    }

    pub fn len(&self) -> usize { self.workspaces.lock().unwrap_or_else(|e| e.into_inner()).len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
