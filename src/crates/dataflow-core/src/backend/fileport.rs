//! The on-disk port transfer contract shared by the multiprocess and batch
//! backends: a value bound for `dest_task:dest_port` is serialized to
//! `<run_dir>/<dest_task_id>_<dest_port_name>.tmp` and then renamed into
//! place, so a reader can never observe a partially written file — a
//! rename within the same filesystem is atomic, a raw write is not.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DataflowError, Result};
use crate::task::PortRef;
use crate::value::Value;

pub fn transfer_path(run_dir: &Path, port_ref: &PortRef) -> PathBuf {
    run_dir.join(port_ref.transfer_file_name())
}

/// Serializes `value` to the destination's transfer file via a temp file
/// plus rename.
pub fn write_value(run_dir: &Path, port_ref: &PortRef, value: &Value) -> Result<()> {
    std::fs::create_dir_all(run_dir)?;
    let final_path = transfer_path(run_dir, port_ref);
    let tmp_path = final_path.with_extension("tmp");
    let bytes = serde_json::to_vec(value)?;
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

/// Reads a transfer file written by [`write_value`], if it already exists.
pub fn try_read_value(run_dir: &Path, port_ref: &PortRef) -> Result<Option<Value>> {
    let path = transfer_path(run_dir, port_ref);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path)?;
    let value = serde_json::from_slice(&bytes)?;
    Ok(Some(value))
}

/// Blocks until a transfer file appears, polling with exponential backoff
/// (starting at `initial_backoff`, doubling each attempt, capped at
/// `max_backoff`) and giving up with [`DataflowError::PollTimeout`] after
/// `max_attempts`. Used by the batch backend, whose ports are not
/// one-sided: nothing notifies a waiting job directly, since jobs don't
/// share memory with whatever wrote the file.
///
/// A [`write_failure_marker`] observed mid-poll fails fast with
/// [`DataflowError::TaskFailed`] instead of waiting out the full retry
/// budget on a file that will never arrive.
pub fn poll_for_value(
    run_dir: &Path,
    port_ref: &PortRef,
    initial_backoff: Duration,
    max_backoff: Duration,
    max_attempts: u32,
) -> Result<Value> {
    let mut backoff = initial_backoff;
    for attempt in 0..max_attempts {
        if let Some(value) = try_read_value(run_dir, port_ref)? {
            return Ok(value);
        }
        if failure_marker_exists(run_dir, port_ref) {
            return Err(DataflowError::TaskFailed {
                task: port_ref.task.to_string(),
                reason: format!("upstream producer of port `{}` failed", port_ref.port),
            });
        }
        if attempt + 1 < max_attempts {
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(max_backoff);
        }
    }
    Err(DataflowError::PollTimeout {
        task: port_ref.task.to_string(),
        port: port_ref.port.clone(),
        attempts: max_attempts,
    })
}

/// A zero-byte marker file written next to a failed task's never-produced
/// output, so a downstream poller distinguishes "still running" from
/// "ran and failed" without waiting out its full retry budget. This is a
/// deliberate improvement over the reference runtime, which left a failed
/// remote task's consumers polling until their own timeout.
pub fn write_failure_marker(run_dir: &Path, port_ref: &PortRef) -> Result<()> {
    std::fs::create_dir_all(run_dir)?;
    let marker = transfer_path(run_dir, port_ref).with_extension("failed");
    std::fs::write(marker, b"")?;
    Ok(())
}

pub fn failure_marker_exists(run_dir: &Path, port_ref: &PortRef) -> bool {
    transfer_path(run_dir, port_ref).with_extension("failed").exists()
}
