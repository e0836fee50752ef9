//! Error types shared across the recorder, passes, and backends.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DataflowError>;

/// Errors that can surface while building, compiling, or executing a pipeline.
///
/// Each variant corresponds to a distinct failure boundary: recording
/// (building the task graph from a pipeline function), a specific compiler
/// pass, or one of the three execution backends.
#[derive(Debug, Error)]
pub enum DataflowError {
    /// A task was referenced before it was added to the graph, or a
    /// duplicate task id was inserted.
    #[error("unknown task `{0}`")]
    UnknownTask(String),

    /// An in-port or out-port name did not exist on the named task.
    #[error("task `{task}` has no port named `{port}`")]
    UnknownPort { task: String, port: String },

    /// A pipeline function returned more outputs than the fixed cap the
    /// compiler supports for tuple unpacking.
    #[error("task `{0}` produced {1} outputs, exceeding the maximum of {2}")]
    TooManyOutputs(String, usize, usize),

    /// Raised by [`crate::pass::typecheck::TypeCheck`] when an edge connects
    /// two ports whose types are not castable in either direction.
    #[error("type mismatch on edge {source_task}:{source_port} -> {dest_task}:{dest_port}: `{source_type}` cannot flow into `{dest_type}`")]
    TypeMismatch {
        source_task: String,
        source_port: String,
        source_type: String,
        dest_task: String,
        dest_port: String,
        dest_type: String,
    },

    /// A compiler pass reported [`crate::pass::PassResult::Error`].
    #[error("pass `{pass}` failed: {message}")]
    PassFailed { pass: &'static str, message: String },

    /// The task function registry has no entry for the given name. This can
    /// only happen for the multiprocess and batch backends, which look tasks
    /// up by name after crossing a process boundary.
    #[error("no task function registered under the name `{0}`; is it missing an `inventory::submit!`?")]
    UnregisteredTaskFn(String),

    /// A backend-specific I/O failure (spawning a process, reading or
    /// writing a port transfer file, writing an archive).
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be (de)serialized across a process or file
    /// boundary.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A child process (multiprocess backend) or batch job (batch backend)
    /// exited with a non-zero status or otherwise never produced its output.
    #[error("task `{task}` failed: {reason}")]
    TaskFailed { task: String, reason: String },

    /// The batch backend's transfer-file poll exceeded its retry budget.
    #[error("timed out waiting for input `{port}` of task `{task}` after {attempts} attempts")]
    PollTimeout {
        task: String,
        port: String,
        attempts: u32,
    },

    /// A remote staging fetch (`ftp:`/`http(s):` source argument) failed.
    #[error("failed to stage remote input `{0}`: {1}")]
    StagingFailed(String, String),

    /// Raised when a pipeline is compiled or run twice, or run before it is
    /// compiled.
    #[error("invalid runner state: {0}")]
    InvalidState(String),

    /// Wraps an arbitrary error surfaced by user task code.
    #[error("task `{task}` raised an error: {source}")]
    TaskError {
        task: String,
        #[source]
        source: anyhow::Error,
    },
}
