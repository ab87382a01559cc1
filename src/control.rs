//! Local administrative endpoint.
//!
//! The process listens on a Unix socket for newline-delimited JSON commands (see [`protocol`]).
//! Commands are registered by name with an argument count range; `help` and `version` are
//! always available. Once the [`Shutdown`] fires, no further command is dispatched, in-flight
//! replies are flushed, the socket file is removed and [`ControlChannel::serve`] returns.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
    sync::oneshot,
};
use tokio_util::task::TaskTracker;

use crate::Shutdown;

pub mod client;
pub mod protocol;

pub use client::{call, ControlClient};
use protocol::{Request, Response};

type Handler = Box<dyn Fn(&[String], Reply) + Send + Sync>;

const ACCEPT_RETRY: Duration = Duration::from_millis(100);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Answers one control request.
///
/// Consumed by [`ok`](Self::ok) or [`err`](Self::err), so a handler cannot reply twice.
/// A handler may move the `Reply` elsewhere and answer later; if it is dropped unanswered,
/// the client receives an error.
#[derive(Debug)]
pub struct Reply {
    tx: oneshot::Sender<Result<Option<String>, String>>,
}

impl Reply {
    fn channel() -> (Self, oneshot::Receiver<Result<Option<String>, String>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn ok(self, body: Option<String>) {
        // the connection may already be gone
        let _ = self.tx.send(Ok(body));
    }

    pub fn err(self, message: impl Into<String>) {
        let _ = self.tx.send(Err(message.into()));
    }
}

struct Command {
    usage: String,
    min_args: usize,
    max_args: usize,
    handler: Handler,
}

/// Registry of named control commands.
#[derive(Default)]
pub struct Commands {
    commands: BTreeMap<String, Command>,
}

impl Commands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, replacing any earlier command of the same name.
    ///
    /// Requests with fewer than `min_args` or more than `max_args` parameters are refused
    /// without calling `handler`. `help` and `version` are built in and cannot be overridden.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        usage: impl Into<String>,
        min_args: usize,
        max_args: usize,
        handler: impl Fn(&[String], Reply) + Send + Sync + 'static,
    ) -> &mut Self {
        self.commands.insert(
            name.into(),
            Command {
                usage: usage.into(),
                min_args,
                max_args,
                handler: Box::new(handler),
            },
        );
        self
    }

    fn help(&self) -> String {
        let mut lines = vec!["The available commands are:".to_owned()];
        let builtins = [("help", ""), ("version", "")];
        let registered = self
            .commands
            .iter()
            .map(|(name, command)| (name.as_str(), command.usage.as_str()));
        let mut all: Vec<_> = builtins.into_iter().chain(registered).collect();
        all.sort_unstable();
        for (name, usage) in all {
            lines.push(format!("  {name:<24}{usage}").trim_end().to_owned());
        }
        lines.join("\n")
    }

    pub(crate) async fn dispatch(&self, request: Request) -> Response {
        let Request { method, params, id } = request;
        let outcome = match method.as_str() {
            "help" => Ok(Some(self.help())),
            "version" => Ok(Some(format!(
                "{} {}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))),
            _ => match self.commands.get(&method) {
                None => Err(format!("\"{method}\" is not a valid command")),
                Some(command) if params.len() < command.min_args => Err(format!(
                    "\"{method}\" command requires at least {} arguments",
                    command.min_args
                )),
                Some(command) if params.len() > command.max_args => Err(format!(
                    "\"{method}\" command takes at most {} arguments",
                    command.max_args
                )),
                Some(command) => {
                    let (reply, rx) = Reply::channel();
                    (command.handler)(&params, reply);
                    rx.await
                        .unwrap_or_else(|_| Err(format!("\"{method}\" command did not reply")))
                }
            },
        };

        match outcome {
            Ok(result) => Response::ok(id, result),
            Err(message) => Response::error(id, message),
        }
    }
}

/// Unix socket server for [`Commands`].
pub struct ControlChannel {
    listener: UnixListener,
    path: PathBuf,
    commands: Arc<Commands>,
    shutdown: Shutdown,
}

impl ControlChannel {
    /// Binds the socket at `path`, replacing a stale socket file left by an earlier process.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(
        path: impl Into<PathBuf>,
        commands: Commands,
        shutdown: Shutdown,
    ) -> Result<Self, ControlError> {
        let path = path.into();
        match fs::remove_file(&path) {
            Ok(()) => log::debug!("removed stale control socket {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(ControlError::Bind { path, source }),
        }

        let listener = match UnixListener::bind(&path) {
            Ok(listener) => listener,
            Err(source) => return Err(ControlError::Bind { path, source }),
        };

        Ok(Self {
            listener,
            path,
            commands: Arc::new(commands),
            shutdown,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serves connections until the shutdown signal fires.
    pub async fn serve(self) {
        let Self {
            listener,
            path,
            commands,
            shutdown,
        } = self;
        let connections = TaskTracker::new();

        log::info!("control channel listening on {}", path.display());
        loop {
            tokio::select! {
                biased;
                () = shutdown.triggered() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        connections.spawn(serve_connection(
                            stream,
                            Arc::clone(&commands),
                            shutdown.clone(),
                        ));
                    }
                    Err(err) => {
                        log::warn!("control channel could not accept a connection: {err}");
                        if shutdown.sleep(ACCEPT_RETRY).await {
                            break;
                        }
                    }
                },
            }
        }

        drop(listener);
        connections.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, connections.wait())
            .await
            .is_err()
        {
            log::warn!(
                "abandoning {} control connections that did not finish in {DRAIN_TIMEOUT:?}",
                connections.len()
            );
        }

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => log::warn!("could not remove control socket {}: {err}", path.display()),
        }
        log::info!("control channel at {} closed", path.display());
    }
}

async fn serve_connection(stream: UnixStream, commands: Arc<Commands>, shutdown: Shutdown) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            biased;
            () = shutdown.triggered() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                log::debug!("control connection read failed: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        // another connection may have fired the shutdown while this line was in flight
        if shutdown.is_triggered() {
            break;
        }

        // replies that are ready go out even after the shutdown, a stalled client is dropped
        let response = tokio::select! {
            biased;
            response = respond(&commands, &line) => response,
            () = shutdown.triggered() => break,
        };
        let written = match protocol::encode(&response) {
            Ok(line) => tokio::select! {
                biased;
                written = writer.write_all(line.as_bytes()) => written,
                () = shutdown.triggered() => break,
            },
            Err(err) => Err(io::Error::new(io::ErrorKind::InvalidData, err)),
        };
        if let Err(err) = written {
            log::debug!("control connection write failed: {err}");
            break;
        }
    }
}

async fn respond(commands: &Commands, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => {
            log::debug!("control command {:?} {:?}", request.method, request.params);
            commands.dispatch(request).await
        }
        Err(err) => Response::error(serde_json::Value::Null, format!("invalid request: {err}")),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("could not bind control socket {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("control socket I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("malformed control message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("control connection closed without a reply")]
    Closed,
    /// The command ran and answered with an error.
    #[error("{0}")]
    Remote(String),
}
