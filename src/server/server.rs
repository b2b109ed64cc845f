//! # Session server - bounded accept, eviction, per-session drive loops.
//!
//! Maintains a small fixed set of live sessions shared by the shell and the
//! optional HTTP variant. On a new connection:
//!
//! ```text
//! capacity free ──────────────► admit
//! full, some session idle
//!   beyond the timeout ───────► evict it, admit the new client
//! full, nothing evictable ────► reply "busy", close
//! ```
//!
//! Per-session loop: bounded read → decode → empty read / `exit` terminate →
//! shell → reply → prompt. A session fault (`NetworkError`) terminates only
//! that session; a fault of the accept loop itself surfaces as a failed
//! `server` task, which the runtime answers with the safe reboot sequence.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::warn;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::server::session::Session;
use crate::server::web;
use crate::shell::{Shell, ShellAction};
use crate::store::ConfigStore;
use crate::tasks::TaskCtx;

/// Bounded multi-client TCP server for the shell and web surfaces.
pub struct SessionServer {
    cfg: Config,
    store: Arc<ConfigStore>,
    dispatcher: Arc<Dispatcher>,
    bus: Bus,
    sessions: tokio::sync::RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionServer {
    /// Creates the server (listeners start inside the server tasks).
    pub fn new(
        cfg: Config,
        store: Arc<ConfigStore>,
        dispatcher: Arc<Dispatcher>,
        bus: Bus,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            store,
            dispatcher,
            bus,
            sessions: tokio::sync::RwLock::new(HashMap::new()),
        })
    }

    /// Accept loop for the line shell. Runs as the `server` system task.
    pub async fn serve_shell(self: &Arc<Self>, ctx: &TaskCtx) -> Result<(), TaskError> {
        let listener = self.bind(self.cfg.port, ctx).await?;
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = accepted.map_err(|e| TaskError::Fatal {
                        error: format!("shell accept failed: {e}"),
                    })?;
                    let session =
                        Arc::new(Session::new(stream, peer, self.cfg.read_size, "S"));
                    if self.admit(&session).await {
                        let me = Arc::clone(self);
                        tokio::spawn(async move { me.drive_shell(session).await });
                    }
                }
            }
        }
    }

    /// Accept loop for the HTTP variant. Shares admission with the shell.
    pub async fn serve_web(self: &Arc<Self>, ctx: &TaskCtx) -> Result<(), TaskError> {
        let listener = self.bind(self.cfg.web_port, ctx).await?;
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = accepted.map_err(|e| TaskError::Fatal {
                        error: format!("web accept failed: {e}"),
                    })?;
                    let session = Arc::new(Session::new(stream, peer, 512, "W"));
                    if self.admit(&session).await {
                        let me = Arc::clone(self);
                        tokio::spawn(async move {
                            if let Err(e) = web::drive_web(&session, &me.dispatcher, &me.cfg).await {
                                warn!(session = session.id(), error = %e, "web session error");
                            }
                            me.finish(&session).await;
                        });
                    }
                }
            }
        }
    }

    async fn bind(&self, port: u16, ctx: &TaskCtx) -> Result<TcpListener, TaskError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| TaskError::Fatal {
                error: format!("bind :{port} failed: {e}"),
            })?;
        if let Ok(addr) = listener.local_addr() {
            ctx.set_output(format!("listening {addr}"));
        }
        Ok(listener)
    }

    /// Admission with idle eviction; see the module header for the policy.
    async fn admit(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| s.is_connected());

        if sessions.len() < self.cfg.session_cap() {
            sessions.insert(session.id().to_string(), Arc::clone(session));
            self.bus
                .publish(Event::now(EventKind::SessionOpened).with_session(session.id()));
            return true;
        }

        let evictable = sessions
            .iter()
            .find(|(_, s)| s.idle() > self.cfg.session_timeout)
            .map(|(id, s)| (id.clone(), Arc::clone(s)));
        if let Some((id, stale)) = evictable {
            sessions.remove(&id);
            stale.close().await;
            self.bus
                .publish(Event::now(EventKind::SessionEvicted).with_session(id.as_str()));
            sessions.insert(session.id().to_string(), Arc::clone(session));
            self.bus
                .publish(Event::now(EventKind::SessionOpened).with_session(session.id()));
            return true;
        }
        drop(sessions);

        let _ = session.send_line("Connection is busy. Bye!").await;
        session.close().await;
        self.bus
            .publish(Event::now(EventKind::SessionRejected).with_session(session.id()));
        false
    }

    /// Read/execute/reply loop of one shell session.
    async fn drive_shell(self: &Arc<Self>, session: Arc<Session>) {
        let mut shell = Shell::new(&self.cfg, Arc::clone(&self.dispatcher), Arc::clone(&self.store));
        let _ = session.send_raw(&shell.prompt()).await;

        loop {
            let line = match session.read_chunk().await {
                Ok(Some(line)) => line,
                // EOF or socket fault terminates only this session.
                Ok(None) | Err(_) => break,
            };
            if line.is_empty() || line == "exit" {
                break;
            }
            session.touch();

            let (replies, action) = shell.handle_line(&line).await;
            for reply in replies {
                if session.send_line(&reply).await.is_err() {
                    break;
                }
            }
            match action {
                ShellAction::Continue => {
                    let _ = session.send_raw(&shell.prompt()).await;
                }
                ShellAction::Terminate => break,
                ShellAction::Reboot { hard } => {
                    self.bus.publish(
                        Event::now(EventKind::RebootRequested)
                            .with_reason(if hard { "hard" } else { "soft" }),
                    );
                    break;
                }
            }
        }

        let _ = session.send_line("Bye!").await;
        self.finish(&session).await;
    }

    /// Close and unregister one session.
    async fn finish(&self, session: &Arc<Session>) {
        session.close().await;
        let mut sessions = self.sessions.write().await;
        if sessions.remove(session.id()).is_some() {
            self.bus
                .publish(Event::now(EventKind::SessionClosed).with_session(session.id()));
        }
    }

    /// Streams one line to every connected session (`~~~` marker).
    pub async fn reply_all(&self, msg: &str) {
        let sessions: Vec<Arc<Session>> = {
            let map = self.sessions.read().await;
            map.values().cloned().collect()
        };
        for session in sessions {
            if session.is_connected() {
                let _ = session.send_line(&format!("~~~ {msg}")).await;
            }
        }
    }

    /// Closes every session (shutdown/reboot notification path).
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut map = self.sessions.write().await;
            map.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.close().await;
        }
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ModuleRegistry;
    use crate::tasks::{TaskFn, TaskManager};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_util::sync::CancellationToken;

    async fn start_server(
        session_limit: usize,
        session_timeout: Duration,
    ) -> (Arc<SessionServer>, std::net::SocketAddr, Arc<TaskManager>) {
        let cfg = Config {
            port: 0, // ephemeral
            session_limit,
            session_timeout,
            ..Config::default()
        };
        let store = Arc::new(ConfigStore::with_defaults());
        let bus = Bus::new(64);
        let tasks = TaskManager::new(bus.clone(), CancellationToken::new(), 4);
        let dispatcher = Dispatcher::new(
            Arc::new(ModuleRegistry::new()),
            Arc::clone(&tasks),
            Duration::from_millis(20),
        );
        let server = SessionServer::new(cfg, store, dispatcher, bus);

        let srv = Arc::clone(&server);
        let task = TaskFn::arc("server", move |ctx| {
            let srv = Arc::clone(&srv);
            async move { srv.serve_shell(&ctx).await }
        });
        assert!(tasks.spawn_system(task).await);

        // Wait for the listener to report its bound address.
        let mut addr = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let out = tasks.show("server").await;
            if let Some(rest) = out.strip_prefix("listening ") {
                addr = rest.trim().parse().ok();
                if addr.is_some() {
                    break;
                }
            }
        }
        (server, addr.expect("server bound"), tasks)
    }

    async fn read_some(stream: &mut TcpStream) -> String {
        let mut buf = [0u8; 1024];
        match tokio::time::timeout(Duration::from_secs(1), stream.read(&mut buf)).await {
            Ok(Ok(n)) => String::from_utf8_lossy(&buf[..n]).to_string(),
            _ => String::new(),
        }
    }

    #[tokio::test]
    async fn test_shell_session_prompt_and_exit() {
        let (server, addr, _tasks) = start_server(2, Duration::from_secs(30)).await;
        let mut client = TcpStream::connect(addr).await.expect("connect");

        let prompt = read_some(&mut client).await;
        assert!(prompt.contains("node01 $ "), "got prompt: {prompt:?}");

        client.write_all(b"hello\n").await.expect("send hello");
        let reply = read_some(&mut client).await;
        assert!(reply.contains("hello:node01:"), "got: {reply:?}");

        client.write_all(b"exit\n").await.expect("send exit");
        let bye = read_some(&mut client).await;
        assert!(bye.contains("Bye!"), "got: {bye:?}");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_rejects_when_nothing_evictable() {
        let (server, addr, _tasks) = start_server(1, Duration::from_secs(600)).await;

        let mut first = TcpStream::connect(addr).await.expect("first");
        let _ = read_some(&mut first).await;
        assert_eq!(server.session_count().await, 1);

        let mut second = TcpStream::connect(addr).await.expect("second");
        let reply = read_some(&mut second).await;
        assert!(reply.contains("busy"), "second client must be refused: {reply:?}");
        assert_eq!(server.session_count().await, 1, "bound never exceeded");
    }

    #[tokio::test]
    async fn test_idle_session_is_evicted_for_new_client() {
        let (server, addr, _tasks) = start_server(1, Duration::from_millis(50)).await;

        let mut first = TcpStream::connect(addr).await.expect("first");
        let _ = read_some(&mut first).await;

        // Let the first session cross the idle threshold.
        tokio::time::sleep(Duration::from_millis(120)).await;

        let mut second = TcpStream::connect(addr).await.expect("second");
        let prompt = read_some(&mut second).await;
        assert!(prompt.contains("node01 $ "), "evicted slot admits: {prompt:?}");
        assert_eq!(server.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_reply_all_reaches_connected_sessions() {
        let (server, addr, _tasks) = start_server(2, Duration::from_secs(30)).await;
        let mut client = TcpStream::connect(addr).await.expect("connect");
        let _ = read_some(&mut client).await;

        server.reply_all("stream test").await;
        let msg = read_some(&mut client).await;
        assert!(msg.contains("~~~ stream test"), "got: {msg:?}");
    }
}
