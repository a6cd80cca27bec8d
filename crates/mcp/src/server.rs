//! MCP server management (spawn, communicate, lifecycle).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Notify, OnceCell, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::framing::{FrameDecoder, encode};
use crate::protocol::{
    CallToolParams, CallToolResult, Incoming, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcReply, JsonRpcRequest, ListToolsResult, METHOD_NOT_FOUND, Tool,
};

/// How long to wait for the stdout reader to drain after the child exits.
const EXIT_DRAIN: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 8 * 1024;

/// Configuration for an MCP server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Merged over the ambient environment of this process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl ServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// The configured name, falling back to the command.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.command
        } else {
            &self.name
        }
    }
}

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Spawned,
    Initializing,
    Ready,
    Closed,
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type Completion = oneshot::Sender<Result<Value>>;

struct Table {
    state: ServerState,
    reason: Option<Error>,
    pending: HashMap<u64, Completion>,
}

struct Shared {
    name: String,
    writer: tokio::sync::Mutex<Option<Writer>>,
    table: Mutex<Table>,
    next_id: AtomicU64,
    kill: Notify,
}

impl Shared {
    fn new(name: String, writer: Option<Writer>) -> Self {
        Self {
            name,
            writer: tokio::sync::Mutex::new(writer),
            table: Mutex::new(Table {
                state: ServerState::Spawned,
                reason: None,
                pending: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            kill: Notify::new(),
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ServerState {
        self.table().state
    }

    fn set_state(&self, from: ServerState, to: ServerState) {
        let mut table = self.table();
        if table.state == from {
            table.state = to;
        }
    }

    /// The error a new call gets once the server is closed.
    fn closed_error(reason: Option<&Error>) -> Error {
        match reason {
            Some(err @ Error::Spawn(_)) => err.clone(),
            Some(err) => Error::Closed(err.to_string()),
            None => Error::Closed("server closed".into()),
        }
    }

    fn check_open(&self) -> Result<()> {
        let table = self.table();
        if table.state == ServerState::Closed {
            return Err(Self::closed_error(table.reason.as_ref()));
        }
        Ok(())
    }

    fn register(&self) -> Result<(u64, oneshot::Receiver<Result<Value>>)> {
        let mut table = self.table();
        if table.state == ServerState::Closed {
            return Err(Self::closed_error(table.reason.as_ref()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        table.pending.insert(id, tx);
        Ok((id, rx))
    }

    fn take_pending(&self, id: u64) -> Option<Completion> {
        self.table().pending.remove(&id)
    }

    /// Enter the terminal state and reject every pending request.
    fn close(&self, err: Error) {
        let pending = {
            let mut table = self.table();
            if table.state == ServerState::Closed {
                return;
            }
            table.state = ServerState::Closed;
            table.reason = Some(err.clone());
            std::mem::take(&mut table.pending)
        };

        info!(server = %self.name, pending = pending.len(), error = %err, "MCP server closed");
        for (_, completion) in pending {
            let _ = completion.send(Err(err.clone()));
        }
        self.kill.notify_one();
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        self.write_locked(&mut writer, frame).await
    }

    async fn write_locked(&self, writer: &mut Option<Writer>, frame: &[u8]) -> Result<()> {
        let Some(w) = writer.as_mut() else {
            return Err(Self::closed_error(self.table().reason.as_ref()));
        };
        let written = async {
            w.write_all(frame).await?;
            w.flush().await
        }
        .await;

        written.map_err(|e| {
            let err = Error::Write(e.to_string());
            self.close(err.clone());
            err
        })
    }
}

/// Handle to a running MCP server.
pub struct Server {
    shared: Arc<Shared>,
    initialized: OnceCell<InitializeResult>,
    tools: tokio::sync::Mutex<Option<Vec<Tool>>>,
}

impl Server {
    /// Spawn a new MCP server process.
    ///
    /// Spawn failures do not return an error: the server starts out closed
    /// and every call reports the spawn error.
    pub async fn spawn(config: ServerConfig) -> Self {
        let name = config.display_name().to_string();

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(server = %name, command = %config.command, error = %e, "failed to spawn MCP server");
                return Self::closed(name, Error::Spawn(e.to_string()));
            }
        };

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Self::closed(name, Error::Spawn("failed to capture stdio".into()));
        };

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(name.clone(), stderr));
        }

        info!(server = %name, command = %config.command, pid = ?child.id(), "spawned MCP server");

        let shared = Arc::new(Shared::new(name, Some(Box::new(stdin))));
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), stdout));
        tokio::spawn(supervise(Arc::clone(&shared), child, reader));

        Self::from_shared(shared)
    }

    /// Speak the protocol over an arbitrary byte stream pair.
    ///
    /// The server closes when `reader` reaches end of stream.
    pub fn connect<R, W>(name: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared::new(name.into(), Some(Box::new(writer))));
        tokio::spawn(read_loop(Arc::clone(&shared), reader));
        Self::from_shared(shared)
    }

    fn closed(name: String, err: Error) -> Self {
        let shared = Arc::new(Shared::new(name, None));
        shared.close(err);
        Self::from_shared(shared)
    }

    fn from_shared(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            initialized: OnceCell::new(),
            tools: tokio::sync::Mutex::new(None),
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ServerState::Closed
    }

    /// Run the initialize handshake once.
    ///
    /// Concurrent callers share the single in-flight handshake.
    pub async fn initialize(&self) -> Result<&InitializeResult> {
        self.shared.check_open()?;
        self.initialized
            .get_or_try_init(|| async {
                self.shared
                    .set_state(ServerState::Spawned, ServerState::Initializing);
                match self.handshake().await {
                    Ok(result) => {
                        self.shared
                            .set_state(ServerState::Initializing, ServerState::Ready);
                        Ok(result)
                    }
                    Err(e) => {
                        self.shared
                            .set_state(ServerState::Initializing, ServerState::Spawned);
                        Err(e)
                    }
                }
            })
            .await
    }

    async fn handshake(&self) -> Result<InitializeResult> {
        let params = serde_json::to_value(InitializeParams::default())
            .map_err(|e| Error::InvalidArguments(e.to_string()))?;
        let value = self.request("initialize", Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| Error::InvalidResponse(format!("initialize: {e}")))?;

        self.notify("notifications/initialized", None).await?;

        info!(
            server = %self.name(),
            remote = ?result.server_info.as_ref().map(|i| i.name.as_str()),
            protocol = ?result.protocol_version,
            "MCP server initialized"
        );
        Ok(result)
    }

    /// Get the tool catalog; the first successful fetch is cached.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.shared.check_open()?;
        self.initialize().await?;

        let mut cache = self.tools.lock().await;
        if let Some(tools) = cache.as_ref() {
            return Ok(tools.clone());
        }
        let tools = self.fetch_tools().await?;
        *cache = Some(tools.clone());
        Ok(tools)
    }

    /// Refetch the tool catalog, replacing the cached one.
    pub async fn refresh_tools(&self) -> Result<Vec<Tool>> {
        self.shared.check_open()?;
        self.initialize().await?;

        let mut cache = self.tools.lock().await;
        let tools = self.fetch_tools().await?;
        *cache = Some(tools.clone());
        Ok(tools)
    }

    async fn fetch_tools(&self) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let value = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(value)
                .map_err(|e| Error::InvalidResponse(format!("tools/list: {e}")))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(server = %self.name(), count = tools.len(), "fetched MCP tool catalog");
        Ok(tools)
    }

    /// Call a tool by name with JSON-encoded arguments.
    ///
    /// Returns the newline-joined text content of the result.
    pub async fn call_tool(&self, name: &str, arguments: &str) -> Result<String> {
        let arguments = parse_arguments(arguments)?;
        self.shared.check_open()?;
        self.initialize().await?;

        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })
        .map_err(|e| Error::InvalidArguments(e.to_string()))?;
        let value = self.request("tools/call", Some(params)).await?;
        let result: CallToolResult = serde_json::from_value(value)
            .map_err(|e| Error::InvalidResponse(format!("tools/call: {e}")))?;

        let text = result.text();
        if result.is_error {
            let message = if text.is_empty() {
                "Tool call failed".to_string()
            } else {
                text
            };
            return Err(Error::ToolFailed(message));
        }
        Ok(text)
    }

    /// Close the server and terminate the process.
    pub async fn shutdown(&self) {
        self.shared.close(Error::Closed("server shut down".into()));
        self.shared.writer.lock().await.take();
        self.shared.kill.notify_one();
    }

    // --- Internal methods ---

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let response = {
            // Ids are assigned under the writer lock so they hit the wire in
            // call order.
            let mut writer = self.shared.writer.lock().await;
            let (id, response) = self.shared.register()?;

            let request = JsonRpcRequest::new(id, method).with_params(params);
            let body = match serde_json::to_vec(&request) {
                Ok(body) => body,
                Err(e) => {
                    self.shared.take_pending(id);
                    return Err(Error::InvalidArguments(e.to_string()));
                }
            };

            debug!(server = %self.name(), id, method, "sending request");
            self.shared.write_locked(&mut writer, &encode(&body)).await?;
            response
        };

        response
            .await
            .unwrap_or_else(|_| Err(Error::Closed("response channel dropped".into())))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.shared.check_open()?;
        let notification = JsonRpcNotification::new(method, params);
        let body = serde_json::to_vec(&notification)
            .map_err(|e| Error::InvalidArguments(e.to_string()))?;
        self.shared.write_frame(&encode(&body)).await
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shared.close(Error::Closed("server dropped".into()));
    }
}

/// Parse tool arguments; blank input means an empty object.
fn parse_arguments(raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::InvalidArguments(format!("arguments are not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(Error::InvalidArguments(
            "arguments must be a JSON object".into(),
        ));
    }
    Ok(value)
}

/// Server stderr is diagnostics only and never parsed as protocol.
async fn log_stderr<R: AsyncRead + Unpin>(server: String, stderr: R) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!(server = %server, "stderr: {line}");
    }
}

async fn read_loop<R>(shared: Arc<Shared>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    let reason = loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break "stream closed".to_string(),
            Ok(n) => {
                decoder.push(&chunk[..n]);
                for body in decoder.drain_frames() {
                    dispatch(&shared, &body).await;
                }
            }
            Err(e) => break format!("read failed: {e}"),
        }
    };

    if decoder.buffered() > 0 {
        warn!(server = %shared.name, bytes = decoder.buffered(), "discarding partial frame at end of stream");
    }
    shared.close(Error::Exited(reason));
}

async fn supervise(shared: Arc<Shared>, mut child: Child, reader: JoinHandle<()>) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = shared.kill.notified() => {
            let _ = child.kill().await;
            child.wait().await
        }
    };

    // Let responses already in the pipe reach their callers first.
    let _ = tokio::time::timeout(EXIT_DRAIN, reader).await;
    shared.close(Error::Exited(describe_exit(status)));
}

fn describe_exit(status: std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => status.to_string(),
        Err(e) => format!("wait failed: {e}"),
    }
}

async fn dispatch(shared: &Shared, body: &[u8]) {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            warn!(server = %shared.name, error = %e, "skipping frame that is not valid JSON");
            return;
        }
    };

    match Incoming::classify(value) {
        Incoming::Response { id: Some(id), outcome } => match shared.take_pending(id) {
            Some(completion) => {
                let _ = completion.send(outcome.map_err(Error::from));
            }
            None => debug!(server = %shared.name, id, "ignoring response for unknown request id"),
        },
        Incoming::Response { id: None, .. } => {
            warn!(server = %shared.name, "ignoring response with a non-integer id");
        }
        Incoming::Request { id, method, .. } => {
            let reply = if method == "ping" {
                JsonRpcReply::ok(id, json!({}))
            } else {
                JsonRpcReply::err(
                    id,
                    JsonRpcError {
                        code: METHOD_NOT_FOUND,
                        message: format!("method not supported by client: {method}"),
                        data: None,
                    },
                )
            };
            match serde_json::to_vec(&reply) {
                Ok(body) => {
                    if let Err(e) = shared.write_frame(&encode(&body)).await {
                        debug!(server = %shared.name, error = %e, "failed to reply to server request");
                    }
                }
                Err(e) => warn!(server = %shared.name, error = %e, "failed to encode reply"),
            }
        }
        Incoming::Notification { method, .. } => {
            debug!(server = %shared.name, %method, "server notification");
        }
        Incoming::Invalid(value) => {
            warn!(server = %shared.name, message = %value, "ignoring unrecognized message");
        }
    }
}
