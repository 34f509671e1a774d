//! Resolve how the backend is started for packaged and development runs.

use crate::error::SupervisorError;
use crate::model::LaunchConfig;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Environment variable carrying the port the backend must bind.
pub(crate) const PORT_ENV: &str = "PORT";
const DEV_INTERPRETER: &str = "python3";
const DEFAULT_ENTRY_SCRIPT: &str = "web_app.py";

/// A fully resolved backend command line.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub packaged: bool,
}

impl LaunchPlan {
    pub(crate) fn resolve(cfg: &LaunchConfig) -> Self {
        let packaged = cfg.resources_dir.is_some();
        let cwd = match cfg.resources_dir.as_deref() {
            Some(resources) => resources.join("backend"),
            None => cfg.backend_dir.clone(),
        };

        if let Some(exe) = cfg.backend_exe.as_ref() {
            return Self {
                program: exe.clone(),
                args: cfg.extra_args.clone(),
                cwd,
                packaged,
            };
        }

        let program = match (cfg.interpreter.as_ref(), cfg.resources_dir.as_deref()) {
            (Some(interpreter), _) => interpreter.clone(),
            (None, Some(resources)) => bundled_interpreter(resources),
            (None, None) => PathBuf::from(DEV_INTERPRETER),
        };
        let script = cfg
            .entry_script
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ENTRY_SCRIPT));
        let script = if script.is_absolute() {
            script
        } else {
            cwd.join(script)
        };

        let mut args = vec![script.to_string_lossy().into_owned()];
        args.extend(cfg.extra_args.iter().cloned());

        Self {
            program,
            args,
            cwd,
            packaged,
        }
    }

    /// Variables added on top of the inherited environment.
    pub(crate) fn env(&self, port: u16) -> [(&'static str, String); 2] {
        [
            ("PYTHONUNBUFFERED", "1".to_string()),
            (PORT_ENV, port.to_string()),
        ]
    }

    /// Bare program names are looked up on `PATH` at spawn time; explicit paths
    /// are checked up front so a broken bundle is reported clearly.
    pub(crate) fn check_program(&self) -> Result<(), SupervisorError> {
        if is_path_like(&self.program) && !self.program.exists() {
            return Err(SupervisorError::MissingExecutable(self.program.clone()));
        }
        Ok(())
    }

    pub(crate) fn display_program(&self) -> String {
        self.program.display().to_string()
    }
}

fn is_path_like(program: &Path) -> bool {
    program.components().count() > 1 || program.is_absolute()
}

#[cfg(windows)]
fn bundled_interpreter(resources: &Path) -> PathBuf {
    resources.join("python").join("python.exe")
}

#[cfg(not(windows))]
fn bundled_interpreter(resources: &Path) -> PathBuf {
    resources.join("python").join("bin").join("python3")
}
