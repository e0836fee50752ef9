//! Inserts a staging task ahead of any source in-port bound to a remote
//! file reference (`ftp://`, `http://`, `https://`), downloading it to a
//! local path before the pipeline's own tasks run.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::DataflowError;
use crate::graph::TaskGraph;
use crate::pass::{Pass, PassContext, PassResult};
use crate::task::{Edge, Port, PortRef, Task, TaskBody, TaskKind};
use crate::value::Value;

pub struct Stage;

impl Pass for Stage {
    fn name(&self) -> &'static str {
        "stage"
    }

    fn run(&self, graph: &mut TaskGraph, ctx: &mut PassContext) -> PassResult {
        let mut staged = Vec::new();
        let task_ids: Vec<_> = graph.tasks().map(|t| t.id).collect();

        for task_id in task_ids {
            let remote_ports: Vec<(String, String, String)> = {
                let task = match graph.task(task_id) {
                    Ok(t) => t,
                    Err(err) => return PassResult::Error(err.to_string()),
                };
                task.args
                    .lock()
                    .unwrap()
                    .iter()
                    .filter_map(|(name, value)| {
                        // A remote reference arrives as a plain `Str` literal
                        // at the call site just as often as a pre-tagged
                        // `File`, so both shapes are checked for a scheme.
                        let path = value.as_path_like()?;
                        let scheme = remote_scheme(path)?;
                        Some((name.clone(), path.to_string(), scheme.to_string()))
                    })
                    .collect()
            };

            for (port_name, remote_path, scheme) in remote_ports {
                let format = {
                    let task = graph.task(task_id).unwrap();
                    task.inputs[&port_name].type_.clone()
                };
                let staging_id = Uuid::new_v4();
                let mut inputs = HashMap::new();
                inputs.insert(
                    "source".to_string(),
                    Port::in_port(crate::typesys::Type::dynamic("any"), "source", staging_id),
                );
                let mut outputs = HashMap::new();
                outputs.insert("0".to_string(), Port::out_port(format, 0, staging_id));

                let staging_task = Task {
                    id: staging_id,
                    name: format!("stage@{port_name}#{task_id}"),
                    kind: TaskKind::Plain,
                    fn_name: "stage_fetch",
                    body: stage_body(),
                    inputs,
                    outputs,
                    out_edges: std::sync::Mutex::new(Vec::new()),
                    args: std::sync::Mutex::new(HashMap::new()),
                    latch: std::sync::atomic::AtomicUsize::new(0),
                    is_source: true,
                    is_sink: std::sync::atomic::AtomicBool::new(false),
                    is_staging: true,
                    is_transform: false,
                    is_fusee: std::sync::atomic::AtomicBool::new(false),
                };
                staging_task.record_arg("source", Value::Str(remote_path.clone()));
                graph.add_task(staging_task);
                graph.set_source(staging_id);
                // The port now receives through the inserted staging task
                // instead of a bound literal, so `task_id` is no longer a
                // root of the graph even if it started out as one.
                graph.unset_source(task_id);

                if let Err(err) = graph.add_edge(Edge::new(
                    PortRef::new(staging_id, "0"),
                    PortRef::new(task_id, port_name.clone()),
                )) {
                    return PassResult::Error(err.to_string());
                }

                if let Ok(task) = graph.task_mut(task_id) {
                    task.args.lock().unwrap().remove(&port_name);
                    if let Err(err) = task.flip_is_immediate(&port_name) {
                        return PassResult::Error(err.to_string());
                    }
                }
                staged.push((port_name, remote_path, scheme));
            }
        }

        if !staged.is_empty() {
            ctx.set(
                "staged_count",
                Value::Int(staged.len() as i64),
            );
            tracing::debug!(count = staged.len(), "stage pass inserted remote fetch tasks");
        }
        PassResult::Continue
    }
}

fn remote_scheme(path: &str) -> Option<&'static str> {
    if path.starts_with("ftp:") {
        Some("ftp")
    } else if path.starts_with("http:") || path.starts_with("https:") {
        Some("http")
    } else {
        None
    }
}

fn stage_body() -> Arc<TaskBody> {
    Arc::new(|args: &HashMap<String, Value>| {
        let source = args
            .get("source")
            .and_then(Value::as_str)
            .ok_or_else(|| DataflowError::StagingFailed("source".into(), "missing source argument".into()))?;
        fetch_remote(source)
    })
}

/// Downloads bytes from a remote source. Kept as a trait so the stage task's
/// body can be exercised in tests without reaching the network.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, source: &str) -> anyhow::Result<Vec<u8>>;
}

/// Fetches over HTTP(S) via the same blocking client the CLI uses for
/// `deploy`.
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    fn fetch(&self, source: &str) -> anyhow::Result<Vec<u8>> {
        let bytes = reqwest::blocking::get(source)?.bytes()?;
        Ok(bytes.to_vec())
    }
}

/// Minimal passive-mode FTP `RETR` client. Anonymous login only; no resume,
/// no TLS. Good enough for pulling a staged input file off a lab FTP drop.
pub struct FtpFetcher;

impl Fetcher for FtpFetcher {
    fn fetch(&self, source: &str) -> anyhow::Result<Vec<u8>> {
        ftp_retr(source)
    }
}

fn fetcher_for_scheme(scheme: &str) -> Box<dyn Fetcher> {
    match scheme {
        "ftp" => Box::new(FtpFetcher),
        _ => Box::new(HttpFetcher),
    }
}

pub fn fetch_remote(source: &str) -> anyhow::Result<Vec<Value>> {
    let scheme = remote_scheme(source)
        .ok_or_else(|| anyhow::anyhow!("no supported scheme in source: {source}"))?;
    fetch_with(source, fetcher_for_scheme(scheme).as_ref())
}

fn fetch_with(source: &str, fetcher: &dyn Fetcher) -> anyhow::Result<Vec<Value>> {
    let format = source.rsplit('.').next().unwrap_or("bin").to_string();
    let file_name = source.rsplit('/').next().unwrap_or("staged").to_string();
    let dest = std::env::temp_dir().join(file_name);

    let bytes = fetcher
        .fetch(source)
        .map_err(|e| DataflowError::StagingFailed(source.to_string(), e.to_string()))?;
    std::fs::write(&dest, &bytes)?;

    Ok(vec![Value::File {
        path: dest.to_string_lossy().to_string(),
        format,
    }])
}

fn ftp_retr(source: &str) -> anyhow::Result<Vec<u8>> {
    let rest = source
        .strip_prefix("ftp://")
        .ok_or_else(|| anyhow::anyhow!("not an ftp url: {source}"))?;
    let (authority, path) = rest
        .split_once('/')
        .ok_or_else(|| anyhow::anyhow!("ftp url missing path: {source}"))?;
    let remote_path = format!("/{path}");
    let (host, port) = match authority.split_once(':') {
        Some((h, p)) => (h, p.parse::<u16>().unwrap_or(21)),
        None => (authority, 21),
    };

    let control = TcpStream::connect((host, port))?;
    let mut writer = control.try_clone()?;
    let mut reader = BufReader::new(control);

    read_reply(&mut reader)?;
    send_cmd(&mut writer, "USER anonymous")?;
    read_reply(&mut reader)?;
    send_cmd(&mut writer, "PASS anonymous@")?;
    read_reply(&mut reader)?;
    send_cmd(&mut writer, "TYPE I")?;
    read_reply(&mut reader)?;

    send_cmd(&mut writer, "PASV")?;
    let pasv_reply = read_reply(&mut reader)?;
    let data_addr = parse_pasv(&pasv_reply)?;
    let mut data_conn = TcpStream::connect(data_addr)?;

    send_cmd(&mut writer, &format!("RETR {remote_path}"))?;
    read_reply(&mut reader)?;

    let mut buf = Vec::new();
    data_conn.read_to_end(&mut buf)?;
    read_reply(&mut reader)?;

    Ok(buf)
}

fn send_cmd(writer: &mut impl Write, cmd: &str) -> anyhow::Result<()> {
    writer.write_all(cmd.as_bytes())?;
    writer.write_all(b"\r\n")?;
    Ok(())
}

fn read_reply(reader: &mut impl BufRead) -> anyhow::Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.is_empty() {
        anyhow::bail!("ftp control connection closed unexpectedly");
    }
    Ok(line)
}

fn parse_pasv(reply: &str) -> anyhow::Result<(Ipv4Addr, u16)> {
    let start = reply
        .find('(')
        .ok_or_else(|| anyhow::anyhow!("malformed PASV reply: {reply}"))?;
    let end = reply
        .find(')')
        .ok_or_else(|| anyhow::anyhow!("malformed PASV reply: {reply}"))?;
    let nums: Vec<u8> = reply[start + 1..end]
        .split(',')
        .map(|n| n.trim().parse())
        .collect::<Result<_, _>>()
        .map_err(|_| anyhow::anyhow!("malformed PASV reply: {reply}"))?;
    if nums.len() != 6 {
        anyhow::bail!("malformed PASV reply: {reply}");
    }
    let ip = Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = ((nums[4] as u16) << 8) | nums[5] as u16;
    Ok((ip, port))
}

inventory::submit! {
    crate::task::TaskFn {
        name: "stage_fetch",
        run: |args| {
            let source = args
                .get("source")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("missing source argument"))?;
            fetch_remote(source)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeFetcher(Vec<u8>);

    impl Fetcher for FakeFetcher {
        fn fetch(&self, _source: &str) -> anyhow::Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn fetch_with_writes_bytes_to_a_local_file_and_tags_its_format() {
        let fetcher = FakeFetcher(b"a,b,c\n1,2,3\n".to_vec());
        let out = fetch_with("http://example.test/data.csv", &fetcher).unwrap();
        assert_eq!(out.len(), 1);
        match &out[0] {
            Value::File { path, format } => {
                assert_eq!(format, "csv");
                let contents = std::fs::read_to_string(path).unwrap();
                assert_eq!(contents, "a,b,c\n1,2,3\n");
            }
            other => panic!("expected a file value, got {other:?}"),
        }
    }

    #[test]
    fn stages_a_literal_url_bound_as_a_plain_string_argument() {
        use crate::recorder::{app, Arg, ParamSpec, ReturnSpec, Signature};
        use crate::typesys::TypeAnnotation;
        use std::collections::HashMap as StdHashMap;

        let mut graph = app("remote_source", |rec| {
            rec.call(
                "ingest",
                "test_ingest",
                Arc::new(|_: &StdHashMap<String, Value>| Ok(vec![Value::Bool(true)])),
                Signature::new(
                    vec![ParamSpec::new("src", TypeAnnotation::AnyFile)],
                    vec![ReturnSpec::new(TypeAnnotation::AnyFile)],
                ),
                vec![Arg::from("ftp://host/p/hail.csv.gz")],
            )?;
            Ok(())
        })
        .unwrap();

        let task_id = graph.tasks().find(|t| t.name == "ingest").unwrap().id;
        assert!(graph.task(task_id).unwrap().is_source);

        let result = Stage.run(&mut graph, &mut PassContext::default());
        assert!(matches!(result, PassResult::Continue));

        // The literal is now fed through an inserted staging task rather
        // than bound directly, and the original task is no longer a source.
        assert!(!graph.task(task_id).unwrap().is_source);
        assert!(graph.tasks().any(|t| t.is_staging));
    }

    #[test]
    fn remote_scheme_recognizes_http_https_and_ftp_only() {
        assert_eq!(remote_scheme("http://h/x"), Some("http"));
        assert_eq!(remote_scheme("https://h/x"), Some("http"));
        assert_eq!(remote_scheme("ftp://h/x"), Some("ftp"));
        assert_eq!(remote_scheme("/local/path.csv"), None);
    }

    #[test]
    fn parse_pasv_extracts_ip_and_port_from_a_227_reply() {
        let reply = "227 Entering Passive Mode (127,0,0,1,200,15).";
        let (ip, port) = parse_pasv(reply).unwrap();
        assert_eq!(ip, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(port, 200 * 256 + 15);
    }
}
