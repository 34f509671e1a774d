//! Error types for the supervisor.
//!
//! Only launch failures are fatal; everything else in the lifecycle is
//! recovered locally and logged.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Resolved backend executable does not exist on disk
    #[error("backend executable not found: {}", .0.display())]
    MissingExecutable(PathBuf),

    /// The OS rejected the spawn
    #[error("failed to spawn backend `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A backend handle already exists for this run
    #[error("a backend process has already been launched for this run")]
    AlreadyRunning,

    /// Shutdown was armed before the launch could start
    #[error("shutdown already in progress")]
    ShuttingDown,

    /// The window host could not create a window
    #[error("window host failed: {0}")]
    Window(String),
}
