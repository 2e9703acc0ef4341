//! A live instance hosted by an external process.
//!
//! # Protocol
//!
//! One JSON object per line in both directions. Requests carry an `id` and
//! are answered by a reply with the same `id`:
//!
//! ```text
//! -> {"id":3,"method":"invoke","params":{"call":"images_complete"}}
//! <- {"id":3,"result":{"type":"bool","value":true}}
//! <- {"id":4,"error":"no such element"}
//! ```
//!
//! Lines without an `id` are events from the host. Only `log` events are
//! understood; error-level ones are kept for [`HostBridge::error_log`].
//!
//! A reader thread routes replies to the waiting caller through the pending
//! map, so the resource server thread can fetch generated resources while the
//! session thread is blocked in another call.

use super::{GeneratedResources, HostBridge, HostFactory, NativeCall, NativeValue, RuntimeInfo};
use crate::{
    error::{
        DecodeSnafu, DisconnectedSnafu, EncodeSnafu, HostDisposedSnafu, HostError, SpawnSnafu,
        TimeoutSnafu, WriteSnafu,
    },
    module::ModuleDescriptor,
};
use async_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use snafu::{ensure, OptionExt, ResultExt};
use std::{
    io::{BufRead, BufReader, BufWriter, Write},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};
use tracing::{debug, error, trace, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(5);
const PUMP_TIMEOUT: Duration = Duration::from_secs(1);
const REPLY_POLL: Duration = Duration::from_millis(1);

enum Reply {
    Ok(Value),
    Err(String),
}

#[derive(Deserialize)]
struct Incoming {
    id: Option<u64>,
    #[serde(default)]
    result: Value,
    error: Option<String>,
    event: Option<String>,
    level: Option<String>,
    message: Option<String>,
}

struct Client {
    stdin: Mutex<BufWriter<ChildStdin>>,
    next_id: AtomicU64,
    pending: Mutex<FxHashMap<u64, Sender<Reply>>>,
    errors: Mutex<String>,
}

impl Client {
    fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<T, HostError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&json!({ "id": id, "method": method, "params": params }))
            .context(EncodeSnafu { method })?;

        let (tx, rx) = async_channel::bounded(1);
        self.pending.lock().insert(id, tx);
        trace!(id, method, "host request");
        if let Err(e) = self.write_line(&line) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let reply = self.wait_reply(id, method, &rx, timeout)?;
        match reply {
            Reply::Ok(value) => serde_json::from_value(value).context(DecodeSnafu { method }),
            Reply::Err(message) => Err(HostError::Remote {
                method: method.to_string(),
                message,
            }),
        }
    }

    fn wait_reply(
        &self,
        id: u64,
        method: &str,
        rx: &Receiver<Reply>,
        timeout: Option<Duration>,
    ) -> Result<Reply, HostError> {
        let Some(timeout) = timeout else {
            return rx.recv_blocking().ok().context(DisconnectedSnafu { method });
        };

        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(reply) => return Ok(reply),
                Err(TryRecvError::Closed) => return DisconnectedSnafu { method }.fail(),
                Err(TryRecvError::Empty) if start.elapsed() >= timeout => {
                    self.pending.lock().remove(&id);
                    return TimeoutSnafu {
                        method,
                        timeout_ms: timeout.as_millis(),
                    }
                    .fail();
                },
                Err(TryRecvError::Empty) => std::thread::sleep(REPLY_POLL),
            }
        }
    }

    fn write_line(&self, line: &str) -> Result<(), HostError> {
        let mut stdin = self.stdin.lock();
        stdin.write_all(line.as_bytes()).context(WriteSnafu)?;
        stdin.write_all(b"\n").context(WriteSnafu)?;
        stdin.flush().context(WriteSnafu)
    }

    fn record_error(&self, message: &str) {
        let mut errors = self.errors.lock();
        errors.push_str(message);
        errors.push('\n');
    }

    fn route(&self, line: &str) {
        let incoming: Incoming = match serde_json::from_str(line) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!("Failed to parse host message: {e}");
                return;
            },
        };

        if let Some(id) = incoming.id {
            let reply = match incoming.error {
                Some(message) => Reply::Err(message),
                None => Reply::Ok(incoming.result),
            };
            let tx = self.pending.lock().remove(&id);
            match tx {
                Some(tx) => {
                    let _ = tx.send_blocking(reply);
                },
                None => debug!(id, "reply for abandoned request"),
            }
            return;
        }

        if incoming.event.as_deref() == Some("log") {
            let message = incoming.message.unwrap_or_default();
            if incoming.level.as_deref() == Some("error") {
                error!("host: {message}");
                self.record_error(&message);
            } else {
                debug!("host: {message}");
            }
        }
    }
}

impl GeneratedResources for Client {
    fn generated_resource(&self, path: &str) -> Option<Vec<u8>> {
        self.request::<Option<Vec<u8>>>(
            "generated_resource",
            json!({ "path": path }),
            Some(CALL_TIMEOUT),
        )
        .unwrap_or_else(|e| {
            debug!(path, "generated resource unavailable: {e}");
            None
        })
    }
}

/// Reads replies and events until the host closes stdout.
fn reader_loop(stdout: ChildStdout, client: Arc<Client>) {
    for line in BufReader::new(stdout).lines() {
        match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => client.route(&line),
            Err(e) => {
                error!("Failed to read from hosting process: {e}");
                break;
            },
        }
    }
    // wakes every caller still waiting
    client.pending.lock().clear();
    debug!("host stdout closed");
}

fn stderr_loop(stderr: ChildStderr, client: Arc<Client>) {
    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
        warn!("host stderr: {line}");
        client.record_error(&line);
    }
}

pub struct ProcessHost {
    child: Child,
    client: Arc<Client>,
    info: RuntimeInfo,
    reader: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<()>>,
    disposed: bool,
}

impl ProcessHost {
    /// Spawn the hosting process and ask it what runtime it embeds.
    pub fn spawn(command: &str, args: &[String]) -> Result<Self, HostError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context(SpawnSnafu { command })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            return Err(HostError::Stdio);
        };

        let client = Arc::new(Client {
            stdin: Mutex::new(BufWriter::new(stdin)),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(FxHashMap::default()),
            errors: Mutex::new(String::new()),
        });

        let reader = {
            let client = client.clone();
            std::thread::spawn(move || reader_loop(stdout, client))
        };
        let stderr = {
            let client = client.clone();
            std::thread::spawn(move || stderr_loop(stderr, client))
        };

        let info = match client.request::<RuntimeInfo>(
            "runtime_info",
            Value::Null,
            Some(HANDSHAKE_TIMEOUT),
        ) {
            Ok(info) => info,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            },
        };
        debug!(command, version = %info.version, "hosting process ready");

        Ok(Self {
            child,
            client,
            info,
            reader: Some(reader),
            stderr: Some(stderr),
            disposed: false,
        })
    }

    fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<T, HostError> {
        ensure!(!self.disposed, HostDisposedSnafu);
        self.client.request(method, params, timeout)
    }

    fn shutdown(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        for handle in [self.reader.take(), self.stderr.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!("host reader thread panicked");
            }
        }
    }
}

impl HostBridge for ProcessHost {
    fn runtime_info(&self) -> &RuntimeInfo {
        &self.info
    }

    fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), HostError> {
        self.call(
            "set_viewport",
            json!({ "width": width, "height": height }),
            Some(CALL_TIMEOUT),
        )
    }

    fn startup(
        &mut self,
        url: &str,
        module_id: &str,
        timeout: Option<Duration>,
    ) -> Result<(), HostError> {
        self.call(
            "startup",
            json!({ "url": url, "module": module_id }),
            timeout,
        )
    }

    fn activate(&mut self) -> Result<(), HostError> {
        self.call("activate", Value::Null, Some(CALL_TIMEOUT))
    }

    fn invoke(&mut self, call: NativeCall) -> Result<NativeValue, HostError> {
        let params = serde_json::to_value(&call).context(EncodeSnafu {
            method: call.name(),
        })?;
        self.call("invoke", params, Some(CALL_TIMEOUT))
    }

    fn generated_resources(&self) -> Arc<dyn GeneratedResources> {
        self.client.clone()
    }

    fn pump_messages(&mut self) {
        if let Err(e) = self.call::<()>("pump", Value::Null, Some(PUMP_TIMEOUT)) {
            trace!("pump failed: {e}");
        }
    }

    fn screenshot(&mut self) -> Result<Vec<u8>, HostError> {
        self.call("screenshot", Value::Null, Some(CALL_TIMEOUT))
    }

    fn error_log(&self) -> String {
        self.client.errors.lock().clone()
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn dispose(&mut self) -> Result<(), HostError> {
        if self.disposed {
            return Ok(());
        }
        let result = self.call("dispose", Value::Null, Some(CALL_TIMEOUT));
        self.disposed = true;
        self.shutdown();
        result
    }
}

impl Drop for ProcessHost {
    fn drop(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.shutdown();
        }
    }
}

/// Spawns a [`ProcessHost`] and accepts it when its runtime release matches
/// the module's.
#[derive(Debug, Clone)]
pub struct ProcessHostFactory {
    pub command: String,
    pub args: Vec<String>,
}

impl ProcessHostFactory {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

/// Compare the `major.minor` part of two version strings.
fn same_release(a: &str, b: &str) -> bool {
    fn release(v: &str) -> Vec<&str> {
        v.split('.').take(2).collect()
    }
    release(a) == release(b)
}

impl HostFactory for ProcessHostFactory {
    fn create(
        &self,
        runtime_version: &str,
        module: &dyn ModuleDescriptor,
    ) -> Result<Option<Box<dyn HostBridge>>, HostError> {
        let mut host = ProcessHost::spawn(&self.command, &self.args)?;
        if !same_release(&host.info.version, runtime_version) {
            debug!(
                module = module.id(),
                wanted = runtime_version,
                offered = %host.info.version,
                "host declined module"
            );
            let _ = host.dispose();
            return Ok(None);
        }
        Ok(Some(Box::new(host)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_compare_major_minor() {
        assert!(same_release("2.2.0", "2.2"));
        assert!(same_release("2.2", "2.2.1-beta"));
        assert!(!same_release("2.1", "2.2"));
        assert!(!same_release("3", "2.2"));
    }

    #[test]
    fn missing_command_fails_to_spawn() {
        let err = ProcessHost::spawn("weft-no-such-host-binary", &[]).err().unwrap();
        assert!(matches!(err, HostError::Spawn { .. }));
    }

    #[test]
    fn incoming_lines_parse() {
        let reply: Incoming = serde_json::from_str(r#"{"id":7,"result":[1,2]}"#).unwrap();
        assert_eq!(reply.id, Some(7));
        assert_eq!(reply.result, json!([1, 2]));

        let event: Incoming =
            serde_json::from_str(r#"{"event":"log","level":"error","message":"boom"}"#).unwrap();
        assert!(event.id.is_none());
        assert_eq!(event.message.as_deref(), Some("boom"));
    }
}
