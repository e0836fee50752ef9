//! Packages a compiled graph into a self-contained, deployable archive.
//!
//! Every backend shares the same inner layout: a serialized
//! [`crate::snapshot::GraphSnapshot`] at `<graph_name>/graph`, plus whatever
//! driver scripts that backend needs to re-invoke the `dataflow` binary's
//! hidden `run-task` entrypoint without the original in-process recorder
//! function. The batch backend additionally emits one job script per
//! executable unit and a `run.sh` that submits them in topological order
//! with `afterany` dependencies, matching the Slurm archive contract; the
//! serial and local backends emit a single driver script since there is no
//! external scheduler to hand work to.
//!
//! The finished directory is tarred and gzip-compressed into
//! `<out_dir>/<app_name>.tar.gz`, mirroring how
//! `examples/MrScripty-Pantograph`'s binary fetcher consumes a `tar.gz` via
//! `flate2`/`tar` on the way in.

use std::fs;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{DataflowError, Result};
use crate::graph::TaskGraph;
use crate::snapshot::GraphSnapshot;

/// Name of the `dataflow` CLI's hidden subcommand that re-enters a packaged
/// archive to run exactly one task, reading its inputs from the run
/// directory's transfer files and writing its outputs back the same way.
/// Shared by [`crate::backend::multiprocess`] (which invokes it directly as
/// a child process) and every driver/job script this module writes (which
/// invoke it via `std::process::Command`-equivalent shell lines).
pub const RUN_TASK_SUBCOMMAND: &str = "run-task";

/// Builds the `<out_dir>/<app_name>.tar.gz` archive for `graph` and returns
/// its path. `backend_label` is one of `"serial"`, `"local"`, or `"slurm"`
/// and controls which driver scripts get written alongside the snapshot.
pub fn package_snapshot(
    graph: &TaskGraph,
    app_name: &str,
    out_dir: &Path,
    backend_label: &str,
) -> Result<PathBuf> {
    let staging_root = tempfile::tempdir()?;
    let graph_dir = staging_root.path().join(&graph.name);
    fs::create_dir_all(&graph_dir)?;

    let snapshot = GraphSnapshot::build(graph)?;
    snapshot.write_to(&graph_dir.join("graph"))?;

    let layers = crate::backend::layered_topo_order(graph)?;
    let order: Vec<_> = layers.into_iter().flatten().collect();

    match backend_label {
        "slurm" => write_slurm_scripts(graph, &graph_dir, &order)?,
        "serial" | "local" => write_driver_script(&graph_dir, backend_label)?,
        other => {
            return Err(DataflowError::InvalidState(format!(
                "unknown package backend label `{other}`"
            )))
        }
    }

    fs::create_dir_all(out_dir)?;
    let archive_path = out_dir.join(format!("{app_name}.tar.gz"));
    let archive_file = fs::File::create(&archive_path)?;
    let encoder = GzEncoder::new(archive_file, Compression::default());
    let mut tar = tar::Builder::new(encoder);
    tar.append_dir_all(&graph.name, &graph_dir)?;
    tar.into_inner()?.finish()?;

    Ok(archive_path)
}

/// A single driver script for the serial/local backends: re-runs the whole
/// graph in process rather than one task at a time, since neither backend
/// hands scheduling off to an external system.
fn write_driver_script(graph_dir: &Path, backend_label: &str) -> Result<()> {
    let script = format!(
        "#!/bin/sh\nset -e\ncd \"$(dirname \"$0\")\"\ndataflow run --backend {backend_label} --graph ./graph \"$@\"\n"
    );
    write_executable(&graph_dir.join("run.sh"), &script)
}

/// One `job_<taskname>_<taskid>.sh` per executable unit plus a `run.sh`
/// that submits them via `sbatch`, in topological order, wiring
/// `--dependency=afterany:$jidN` edges that follow the task graph's own
/// edges. Job indices (`jid0`, `jid1`, ...) are assigned in the same
/// topological order the scripts are written in, so a job only ever
/// depends on a `$jid` variable already bound by an earlier `sbatch` line.
fn write_slurm_scripts(graph: &TaskGraph, graph_dir: &Path, order: &[crate::task::TaskId]) -> Result<()> {
    use std::collections::HashMap;

    let mut index_of: HashMap<crate::task::TaskId, usize> = HashMap::new();
    for (i, id) in order.iter().enumerate() {
        index_of.insert(*id, i);
    }

    let mut run_sh = String::from("#!/bin/sh\nset -e\ncd \"$(dirname \"$0\")\"\n\n");

    for (i, task_id) in order.iter().enumerate() {
        let task = graph.task(*task_id)?;
        let script_name = format!("job_{}_{}.sh", task.name, task.id);
        let job_script = format!(
            "#!/bin/sh\n#SBATCH --job-name={name}\nset -e\ncd \"$(dirname \"$0\")\"\ndataflow {cmd} --graph ./graph --task {id}\n",
            name = task.name,
            cmd = RUN_TASK_SUBCOMMAND,
            id = task.id,
        );
        write_executable(&graph_dir.join(&script_name), &job_script)?;

        let predecessor_indices: Vec<usize> = graph
            .in_edges(*task_id)
            .iter()
            .filter_map(|e| index_of.get(&graph.resolve(e.source.task)).copied())
            .filter(|&p| p != i)
            .collect();

        let dependency_flag = if predecessor_indices.is_empty() {
            String::new()
        } else {
            let deps = predecessor_indices
                .iter()
                .map(|p| format!("afterany:$jid{p}"))
                .collect::<Vec<_>>()
                .join(",");
            format!(" --dependency={deps}")
        };

        run_sh.push_str(&format!(
            "jid{i}=$(sbatch --parsable{dependency_flag} {script_name})\n"
        ));
    }

    write_executable(&graph_dir.join("run.sh"), &run_sh)
}

fn write_executable(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{app, Arg, ParamSpec, ReturnSpec, Signature};
    use crate::typesys::TypeAnnotation;
    use crate::value::Value;
    use std::collections::HashMap as Map;
    use std::sync::Arc;

    fn build_three_task_chain() -> TaskGraph {
        let mut graph = app("chain3", |rec| {
            let a = rec.call(
                "a",
                "test_a",
                Arc::new(|args: &Map<String, Value>| Ok(vec![args["x"].clone()])),
                Signature::new(
                    vec![ParamSpec::new("x", TypeAnnotation::Int)],
                    vec![ReturnSpec::new(TypeAnnotation::Int)],
                ),
                vec![Arg::from(1)],
            )?;
            let b = rec.call(
                "b",
                "test_b",
                Arc::new(|args: &Map<String, Value>| Ok(vec![args["x"].clone()])),
                Signature::new(
                    vec![ParamSpec::new("x", TypeAnnotation::Int)],
                    vec![ReturnSpec::new(TypeAnnotation::Int)],
                ),
                vec![Arg::from(a[0])],
            )?;
            rec.call(
                "c",
                "test_c",
                Arc::new(|args: &Map<String, Value>| Ok(vec![args["x"].clone()])),
                Signature::new(
                    vec![ParamSpec::new("x", TypeAnnotation::Int)],
                    vec![ReturnSpec::new(TypeAnnotation::Int)],
                ),
                vec![Arg::from(b[0])],
            )?;
            Ok(())
        })
        .unwrap();
        // Packaging doesn't depend on fusion having run, but a real caller
        // always compiles first; skip it here so all three tasks remain
        // distinct executable units for the Slurm scenario under test.
        let _ = &mut graph;
        graph
    }

    #[test]
    fn packages_a_slurm_archive_with_one_job_per_task_and_afterany_chain() {
        let graph = build_three_task_chain();
        let out = tempfile::tempdir().unwrap();
        let archive = package_snapshot(&graph, "chain3", out.path(), "slurm").unwrap();
        assert!(archive.exists());
        assert_eq!(archive.extension().unwrap(), "gz");
    }

    #[test]
    fn packages_a_serial_archive_with_a_single_driver_script() {
        let graph = build_three_task_chain();
        let out = tempfile::tempdir().unwrap();
        let archive = package_snapshot(&graph, "chain3", out.path(), "serial").unwrap();
        assert!(archive.exists());
    }
}
