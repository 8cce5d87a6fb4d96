//! Gardener configuration, stored as TOML. Grounded on the teacher's
//! `io/config.rs` `RunnerConfig`/`GuardConfig`/atomic-write pattern,
//! generalized from a single guard command to the implement/review runner
//! command lines and the per-step timeouts/limits this engine needs.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Named runner backends a [`RunnerSpec`] can resolve to a default command
/// line for (§6.1 supplement: "one trait, one method, a config table from
/// kind to command line" rather than a trait impl per backend).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    Claude,
    Gemini,
    OpenCode,
    Custom,
}

impl RunnerKind {
    fn default_command(self) -> Vec<String> {
        match self {
            RunnerKind::Claude => vec!["claude".to_string(), "-p".to_string()],
            RunnerKind::Gemini => vec!["gemini".to_string(), "-p".to_string()],
            RunnerKind::OpenCode => vec!["opencode".to_string(), "run".to_string()],
            RunnerKind::Custom => Vec::new(),
        }
    }
}

/// A resolved runner command line: `kind` picks the default, `command`
/// overrides it when non-empty (required when `kind = "custom"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerSpec {
    pub kind: RunnerKind,
    pub command: Vec<String>,
}

impl Default for RunnerSpec {
    fn default() -> Self {
        Self {
            kind: RunnerKind::Claude,
            command: Vec::new(),
        }
    }
}

impl RunnerSpec {
    /// The command line to invoke: the explicit override if set, otherwise
    /// `kind`'s default.
    pub fn resolve(&self) -> Result<Vec<String>> {
        if !self.command.is_empty() {
            return Ok(self.command.clone());
        }
        let default = self.kind.default_command();
        if default.is_empty() {
            return Err(anyhow!("runner kind 'custom' requires an explicit command"));
        }
        Ok(default)
    }
}

/// Gardener configuration (TOML, `.arborist/config.toml` by convention).
///
/// Intended to be hand-edited; missing fields default to sensible values so
/// a missing file is equivalent to the default configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GardenerConfig {
    /// Maximum retries per leaf after the first attempt (§4.5): the loop
    /// terminates when `attempt > max_retries`.
    pub max_retries: u32,
    pub implement_timeout_secs: u64,
    pub test_timeout_secs: u64,
    pub review_timeout_secs: u64,
    /// Truncate captured runner/test/review output beyond this many bytes.
    pub output_limit_bytes: usize,
    pub implement_runner: RunnerSpec,
    pub review_runner: RunnerSpec,
    /// The branch the final merge targets (§4.6). `None` means "whatever
    /// branch the gardener was started on" (§3.2 "Base branch").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    /// Optional directory for report/log sidecars (§3.3, §6.5). `None`
    /// disables artifact writing entirely; engine behavior is unaffected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<String>,
}

impl Default for GardenerConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            implement_timeout_secs: 10 * 60,
            test_timeout_secs: 5 * 60,
            review_timeout_secs: 5 * 60,
            output_limit_bytes: 200_000,
            implement_runner: RunnerSpec::default(),
            review_runner: RunnerSpec::default(),
            base_branch: None,
            artifacts_dir: None,
        }
    }
}

impl GardenerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.implement_timeout_secs == 0 {
            return Err(anyhow!("implement_timeout_secs must be > 0"));
        }
        if self.test_timeout_secs == 0 {
            return Err(anyhow!("test_timeout_secs must be > 0"));
        }
        if self.review_timeout_secs == 0 {
            return Err(anyhow!("review_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        self.implement_runner.resolve().context("implement_runner")?;
        self.review_runner.resolve().context("review_runner")?;
        Ok(())
    }
}

/// Load config from a TOML file; a missing file yields
/// `GardenerConfig::default()`.
pub fn load_config(path: &Path) -> Result<GardenerConfig> {
    if !path.exists() {
        let cfg = GardenerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GardenerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GardenerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, GardenerConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = GardenerConfig::default();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn custom_kind_requires_explicit_command() {
        let spec = RunnerSpec {
            kind: RunnerKind::Custom,
            command: Vec::new(),
        };
        assert!(spec.resolve().is_err());
    }

    #[test]
    fn claude_kind_resolves_to_default_command() {
        let spec = RunnerSpec::default();
        assert_eq!(spec.resolve().unwrap(), vec!["claude".to_string(), "-p".to_string()]);
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let mut cfg = GardenerConfig::default();
        cfg.implement_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
