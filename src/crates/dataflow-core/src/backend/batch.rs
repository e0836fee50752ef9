//! Packages a compiled graph into a Slurm job array and, on request, ships
//! the resulting archive to a cluster's login node.
//!
//! Unlike the sequential and multiprocess backends, there is no "run"
//! operation here: the graph's tasks execute as independently scheduled
//! Slurm jobs, each polling the filesystem for its inputs (see
//! `examples/original_source/slurm.py`'s `time.sleep(1)` poll loop, carried
//! forward as [`crate::backend::fileport::poll_for_value`]'s one-second
//! default), long after this process has exited. `run()` therefore always
//! fails with [`crate::error::DataflowError::InvalidState`] pointing callers
//! at `package` + `deploy` instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{Backend, BackendConfig, BackendType, RunOutputs};
use crate::error::{DataflowError, Result};
use crate::graph::TaskGraph;

/// Ships a packaged archive to wherever Slurm jobs actually get submitted
/// from. Behind a trait so tests can substitute a fake that records calls
/// instead of shelling out to `scp`/`ssh`, which this crate has no way to
/// exercise in CI.
pub trait Submitter {
    fn submit(&self, archive: &Path, target_url: &str) -> Result<()>;
}

/// The real submitter: copies the archive to `target_url` (an
/// `scp`-style `user@host:path` destination) and runs its `run.sh` over
/// `ssh`. This is deliberately the thinnest possible wrapper around two
/// external commands rather than an SSH/SCP client embedded in the crate;
/// actual network upload is explicitly out of this engine's scope (spec
/// carries "network upload is explicitly out of this engine's scope").
pub struct ShellSubmitter;

impl Submitter for ShellSubmitter {
    fn submit(&self, archive: &Path, target_url: &str) -> Result<()> {
        let (host, remote_path) = target_url.split_once(':').ok_or_else(|| {
            DataflowError::InvalidState(format!(
                "expected a `host:path` deploy target, got `{target_url}`"
            ))
        })?;

        let scp_status = std::process::Command::new("scp")
            .arg(archive)
            .arg(target_url)
            .status()
            .map_err(DataflowError::Io)?;
        if !scp_status.success() {
            return Err(DataflowError::TaskFailed {
                task: "deploy".to_string(),
                reason: format!("scp to `{target_url}` exited with {scp_status}"),
            });
        }

        let archive_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let remote_cmd = format!(
            "cd {remote_path} && tar xzf {archive_name} && find . -maxdepth 1 -name run.sh -execdir sh run.sh \\;"
        );
        let ssh_status = std::process::Command::new("ssh")
            .arg(host)
            .arg(remote_cmd)
            .status()
            .map_err(DataflowError::Io)?;
        if !ssh_status.success() {
            return Err(DataflowError::TaskFailed {
                task: "deploy".to_string(),
                reason: format!("remote submit on `{host}` exited with {ssh_status}"),
            });
        }
        Ok(())
    }
}

pub struct BatchBackend;

impl Backend for BatchBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Slurm
    }

    fn run(&self, _graph: Arc<TaskGraph>, _config: &BackendConfig) -> Result<RunOutputs> {
        Err(DataflowError::InvalidState(
            "the slurm backend has no direct run; package the graph and deploy the archive to a cluster instead".to_string(),
        ))
    }

    fn package(
        &self,
        graph: &TaskGraph,
        app_name: &str,
        out_dir: &Path,
        _config: &BackendConfig,
    ) -> Result<PathBuf> {
        crate::archive::package_snapshot(graph, app_name, out_dir, "slurm")
    }

    fn deploy(&self, archive: &Path, target_url: &str) -> Result<()> {
        deploy_with(archive, target_url, &ShellSubmitter)
    }
}

/// The body of [`BatchBackend::deploy`], parameterized over the submitter
/// so tests can inject a fake without shelling out.
pub fn deploy_with(archive: &Path, target_url: &str, submitter: &dyn Submitter) -> Result<()> {
    if !archive.exists() {
        return Err(DataflowError::InvalidState(format!(
            "archive `{}` does not exist",
            archive.display()
        )));
    }
    submitter.submit(archive, target_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeSubmitter {
        calls: RefCell<Vec<(PathBuf, String)>>,
    }

    impl Submitter for FakeSubmitter {
        fn submit(&self, archive: &Path, target_url: &str) -> Result<()> {
            self.calls
                .borrow_mut()
                .push((archive.to_path_buf(), target_url.to_string()));
            Ok(())
        }
    }

    #[test]
    fn deploy_with_rejects_a_missing_archive() {
        let fake = FakeSubmitter {
            calls: RefCell::new(Vec::new()),
        };
        let result = deploy_with(Path::new("/nonexistent/archive.tar.gz"), "user@host:/tmp", &fake);
        assert!(result.is_err());
        assert!(fake.calls.borrow().is_empty());
    }

    #[test]
    fn deploy_with_delegates_to_the_submitter_for_an_existing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("app.tar.gz");
        std::fs::write(&archive, b"fake archive bytes").unwrap();

        let fake = FakeSubmitter {
            calls: RefCell::new(Vec::new()),
        };
        deploy_with(&archive, "user@cluster:/scratch/app", &fake).unwrap();

        let calls = fake.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "user@cluster:/scratch/app");
    }

    #[test]
    fn run_refuses_direct_execution() {
        use crate::recorder::{app, Arg, ParamSpec, ReturnSpec, Signature};
        use crate::typesys::TypeAnnotation;
        use crate::value::Value;
        use std::collections::HashMap as Map;

        let graph = app("noop", |rec| {
            rec.call(
                "identity",
                "test_identity",
                std::sync::Arc::new(|args: &Map<String, Value>| Ok(vec![args["x"].clone()])),
                Signature::new(
                    vec![ParamSpec::new("x", TypeAnnotation::Int)],
                    vec![ReturnSpec::new(TypeAnnotation::Int)],
                ),
                vec![Arg::from(1)],
            )?;
            Ok(())
        })
        .unwrap();

        let backend = BatchBackend;
        let result = backend.run(Arc::new(graph), &BackendConfig::default());
        assert!(matches!(result, Err(DataflowError::InvalidState(_))));
    }
}
