//! Exec resource - runs a shell command
//!
//! A plain exec runs on every apply unless its `creates` path exists. A
//! `refreshonly` exec only runs when something it subscribes to changes.

use anyhow::{Context, Result, bail};
use converge::{ApplyContext, PropertyMap, Resource, ResourceMeta, Value};
use std::path::PathBuf;
use std::process::Command;

use super::Params;

pub const TYPE: &str = "exec";

const COMMAND: &str = "command";
const REFRESHONLY: &str = "refreshonly";
const CREATES: &str = "creates";
const CWD: &str = "cwd";

/// Property standing for "the command ran successfully"
const RETURNS: &str = "returns";
const NOT_RUN: &str = "notrun";

#[derive(Debug, Clone)]
pub struct Exec {
    meta: ResourceMeta,
    command: String,
    refreshonly: bool,
    creates: Option<PathBuf>,
    cwd: Option<PathBuf>,
}

impl Exec {
    pub fn from_params(meta: ResourceMeta, params: &Params<'_>) -> Result<Self> {
        params.only(&[COMMAND, REFRESHONLY, CREATES, CWD])?;
        let command = params
            .string(COMMAND)?
            .unwrap_or_else(|| meta.reference.title().to_string());
        if command.trim().is_empty() {
            bail!("{}: command is empty", meta.reference);
        }
        Ok(Self {
            command,
            refreshonly: params.bool(REFRESHONLY)?,
            creates: params.string(CREATES)?.map(|p| crate::paths::expand(&p)),
            cwd: params.string(CWD)?.map(|p| crate::paths::expand(&p)),
            meta,
        })
    }

    fn already_created(&self) -> bool {
        self.creates.as_ref().is_some_and(|path| path.exists())
    }

    /// Run the command through `sh -c`, failing on a non-zero exit
    fn run(&self) -> Result<()> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(&self.command);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        log::debug!("{}: Executing '{}'", self.meta.reference, self.command);
        let output = command
            .output()
            .with_context(|| format!("Failed to execute: {}", self.command))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            log::debug!("{}: {line}", self.meta.reference);
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            match output.status.code() {
                Some(code) => bail!("'{}' returned {code}: {}", self.command, stderr.trim()),
                None => bail!("'{}' was terminated by a signal", self.command),
            }
        }
        Ok(())
    }
}

impl Resource for Exec {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn pre_run_check(&self) -> Result<()> {
        if let Some(cwd) = &self.cwd
            && !cwd.is_dir()
        {
            bail!("cwd {} is not a directory", cwd.display());
        }
        Ok(())
    }

    fn responds_to(&self, callback: &str) -> bool {
        callback == "refresh"
    }

    fn callback(&mut self, callback: &str) -> Result<()> {
        if callback != "refresh" {
            bail!("{} does not respond to '{callback}'", self.meta.reference);
        }
        if self.already_created() {
            log::debug!("{}: Skipping refresh, creates path exists", self.meta.reference);
            return Ok(());
        }
        self.run()
    }

    fn desired_state(&self) -> PropertyMap {
        PropertyMap::from([(RETURNS.to_string(), Value::from(0))])
    }

    fn current_state(&self, _ctx: &ApplyContext) -> Result<PropertyMap> {
        let returns = if self.refreshonly || self.already_created() {
            Value::from(0)
        } else {
            Value::from(NOT_RUN)
        };
        Ok(PropertyMap::from([(RETURNS.to_string(), returns)]))
    }

    fn sync(&mut self, _property: &str, _desired: &Value, _ctx: &ApplyContext) -> Result<()> {
        self.run()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn exec(params: Value) -> Exec {
        let values: PropertyMap = serde_json::from_value(params).unwrap();
        let meta = ResourceMeta::new(TYPE, "test");
        let reference = meta.reference.clone();
        Exec::from_params(meta, &Params::new(&reference, &values)).unwrap()
    }

    fn returns(exec: &Exec) -> Value {
        exec.current_state(&ApplyContext::new(false)).unwrap()[RETURNS].clone()
    }

    #[test]
    fn test_runs_until_creates_exists() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("done");
        let mut exec = exec(json!({
            "command": format!("touch '{}'", marker.display()),
            "creates": marker.display().to_string(),
        }));

        assert_eq!(returns(&exec), json!(NOT_RUN));
        exec.sync(RETURNS, &json!(0), &ApplyContext::new(false)).unwrap();
        assert!(marker.exists());
        assert_eq!(returns(&exec), json!(0));
    }

    #[test]
    fn test_refreshonly_is_in_sync_but_refreshes() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("refreshed");
        let mut exec = exec(json!({
            "command": format!("touch '{}'", marker.display()),
            "refreshonly": true,
        }));

        assert_eq!(returns(&exec), json!(0));
        assert!(exec.responds_to("refresh"));
        exec.callback("refresh").unwrap();
        assert!(marker.exists());
    }

    #[test]
    fn test_failing_command_reports_exit_code() {
        let mut exec = exec(json!({"command": "echo nope >&2; exit 3"}));
        let err = exec
            .sync(RETURNS, &json!(0), &ApplyContext::new(false))
            .unwrap_err();
        assert_eq!(err.to_string(), "'echo nope >&2; exit 3' returned 3: nope");
    }

    #[test]
    fn test_cwd_checked_before_run() {
        let exec = exec(json!({"command": "true", "cwd": "/nonexistent/steward/cwd"}));
        assert!(exec.pre_run_check().is_err());
    }
}
