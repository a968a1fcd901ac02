//! Where a wikipage installation keeps its state.
//!
//! Every path is resolved as flag > environment > heuristic > default. The
//! project root is the nearest ancestor of the working directory (or of the
//! executable) that holds a `.wikipage/` directory.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

pub const STATE_DIR_NAME: &str = ".wikipage";
pub const DB_FILENAME: &str = "wikipage.db";

const ENV_PROJECT_ROOT: &str = "WIKIPAGE_PROJECT_ROOT";
const ENV_DATA_DIR: &str = "WIKIPAGE_DATA_DIR";
const ENV_CONFIG: &str = "WIKIPAGE_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

/// Paths given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        Ok(Self {
            cwd: env::current_dir().context("failed to read current directory")?,
            executable_dir: env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub outbox_dir: PathBuf,
    pub root_source: ValueSource,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        let lines = [
            format!("project_root={} ({})", normalize_for_display(&self.project_root), self.root_source.as_str()),
            format!("state_dir={}", normalize_for_display(&self.state_dir)),
            format!("data_dir={} ({})", normalize_for_display(&self.data_dir), self.data_source.as_str()),
            format!("db_path={}", normalize_for_display(&self.db_path)),
            format!("config_path={} ({})", normalize_for_display(&self.config_path), self.config_source.as_str()),
            format!("outbox_dir={}", normalize_for_display(&self.outbox_dir)),
        ];
        lines.join("\n")
    }
}

/// What exists on disk for a resolved layout.
#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub state_dir_exists: bool,
    pub config_exists: bool,
    pub db_exists: bool,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let state_dir_exists = paths.state_dir.is_dir();
    let config_exists = paths.config_path.is_file();
    let db_exists = paths.db_path.is_file();
    if paths.state_dir.exists() && !state_dir_exists {
        bail!("{} exists but is not a directory", paths.state_dir.display());
    }

    let mut warnings = Vec::new();
    if !state_dir_exists {
        warnings.push(format!("{STATE_DIR_NAME}/ is missing; run `wikipage init` first"));
    }
    if !config_exists {
        warnings.push("config.toml is missing; built-in defaults are in effect".to_string());
    }
    if state_dir_exists && !db_exists {
        warnings.push("page database is missing; it will be created on first use".to_string());
    }

    Ok(RuntimeStatus {
        state_dir_exists,
        config_exists,
        db_exists,
        warnings,
    })
}

pub fn ensure_runtime_ready(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if status.state_dir_exists {
        return Ok(());
    }
    bail!(
        "Runtime layout is not initialized.\nMissing required path: {STATE_DIR_NAME}/\nRun: wikipage init --project-root {}",
        normalize_for_display(&paths.project_root)
    )
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) =
        match resolve_setting(overrides.project_root.as_deref(), ENV_PROJECT_ROOT, &context.cwd, &lookup_env) {
            Some(found) => found,
            None => (find_project_root(context), ValueSource::Heuristic),
        };
    let state_dir = project_root.join(STATE_DIR_NAME);

    let (data_dir, data_source) =
        resolve_setting(overrides.data_dir.as_deref(), ENV_DATA_DIR, &project_root, &lookup_env)
            .unwrap_or_else(|| (state_dir.join("data"), ValueSource::Default));
    let (config_path, config_source) =
        resolve_setting(overrides.config.as_deref(), ENV_CONFIG, &project_root, &lookup_env)
            .unwrap_or_else(|| (state_dir.join("config.toml"), ValueSource::Default));

    let resolved = ResolvedPaths {
        db_path: data_dir.join(DB_FILENAME),
        outbox_dir: state_dir.join("outbox"),
        project_root,
        state_dir,
        data_dir,
        config_path,
        root_source,
        data_source,
        config_source,
    };
    debug!(
        project_root = %normalize_for_display(&resolved.project_root),
        source = resolved.root_source.as_str(),
        "resolved runtime paths"
    );
    Ok(resolved)
}

/// A flag wins over its environment variable; relative values hang off `base`.
fn resolve_setting<F>(
    flag: Option<&Path>,
    env_key: &str,
    base: &Path,
    lookup_env: &F,
) -> Option<(PathBuf, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = flag {
        return Some((base.join(path), ValueSource::Flag));
    }
    lookup_env(env_key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(|value| (base.join(value), ValueSource::Env))
}

fn find_project_root(context: &ResolutionContext) -> PathBuf {
    let exe_ancestors = context
        .executable_dir
        .iter()
        .flat_map(|dir| dir.ancestors());
    context
        .cwd
        .ancestors()
        .chain(exe_ancestors)
        .find(|candidate| candidate.join(STATE_DIR_NAME).is_dir())
        .unwrap_or(context.cwd.as_path())
        .to_path_buf()
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    for dir in [&paths.state_dir, &paths.data_dir, &paths.outbox_dir] {
        if dir.is_dir() {
            continue;
        }
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        created_dirs.push(dir.clone());
    }

    let wrote_config = options.materialize_config && (options.force || !paths.config_path.exists());
    if wrote_config {
        write_config(&paths.config_path)?;
    }

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

fn write_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, MATERIALIZED_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))
}

const MATERIALIZED_CONFIG: &str = r#"# wikipage runtime configuration (materialized by `wikipage init`)

[wiki]
name = "Wiki"
home_page = "Wiki/Home"
# base_url = "https://wiki.example.org"
format = "Default"
date_format = "%x"
admins = []

# Wiki-wide defaults. Remove this table to fall back to
# read-only guests and full access for signed-in users.
# [permissions."wiki:pages"]
# guest = ["show", "read"]
# users = ["show", "read", "edit"]

# [users.alice]
# fullname = "Alice Example"

[logging]
level = "info"
"#;

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
