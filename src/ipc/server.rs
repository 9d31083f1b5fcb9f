//! IPC server for the capture-field UI
//!
//! Request-response over a Unix domain socket (loopback TCP where Unix
//! sockets are unavailable), plus pushed hotkey notifications for
//! subscribed clients.

#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::events::HotkeyEvent;
use crate::state::ControllerHandle;

use super::protocol::{DaemonStatus, Notification, Request, Response};

const MAX_FRAME_LEN: usize = 1024 * 1024;

enum Endpoint {
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
    },
    #[cfg(not(unix))]
    Tcp(tokio::net::TcpListener),
}

/// IPC Server handling client connections
pub struct Server {
    endpoint: Endpoint,
    controller: ControllerHandle,
    events: broadcast::Sender<HotkeyEvent>,
    shutdown_tx: broadcast::Sender<()>,
    start_time: Instant,
}

impl Server {
    /// Bind the IPC endpoint described by `config`
    pub fn bind(
        config: &Config,
        controller: ControllerHandle,
        events: broadcast::Sender<HotkeyEvent>,
    ) -> Result<Self> {
        let endpoint = Self::bind_endpoint(config)?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            endpoint,
            controller,
            events,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    #[cfg(unix)]
    fn bind_endpoint(config: &Config) -> Result<Endpoint> {
        let socket_path: &Path = &config.socket_path;

        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener =
            tokio::net::UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!(?socket_path, "IPC server listening");
        Ok(Endpoint::Unix {
            listener,
            path: socket_path.to_owned(),
        })
    }

    #[cfg(not(unix))]
    fn bind_endpoint(config: &Config) -> Result<Endpoint> {
        let std_listener = std::net::TcpListener::bind(config.tcp_addr)
            .with_context(|| format!("failed to bind {}", config.tcp_addr))?;
        std_listener.set_nonblocking(true)?;
        let listener = tokio::net::TcpListener::from_std(std_listener)?;
        info!(addr = %config.tcp_addr, "IPC server listening");
        Ok(Endpoint::Tcp(listener))
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            let accepted = match &self.endpoint {
                #[cfg(unix)]
                Endpoint::Unix { listener, .. } => listener
                    .accept()
                    .await
                    .map(|(stream, _)| self.spawn_client(stream)),
                #[cfg(not(unix))]
                Endpoint::Tcp(listener) => listener
                    .accept()
                    .await
                    .map(|(stream, _)| self.spawn_client(stream)),
            };
            if let Err(e) = accepted {
                error!(?e, "accept error");
            }
        }
    }

    fn spawn_client<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        debug!("client connected");
        let controller = self.controller.clone();
        let events = self.events.clone();
        let start_time = self.start_time;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                result = handle_client(stream, controller, events, start_time) => {
                    if let Err(e) = result {
                        warn!(?e, "client handler error");
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("client handler shutting down");
                }
            }
        });
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        #[cfg(unix)]
        {
            let Endpoint::Unix { path, .. } = &self.endpoint;
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(?e, "failed to remove socket file");
                }
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Serve one client until it disconnects
async fn handle_client<S>(
    stream: S,
    controller: ControllerHandle,
    events: broadcast::Sender<HotkeyEvent>,
    start_time: Instant,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    // Frame reads are not cancel safe, so they live in their own task
    let (request_tx, mut request_rx) = mpsc::channel::<Request>(8);
    let read_task = tokio::spawn(async move {
        loop {
            match read_request(&mut reader).await {
                Ok(Some(request)) => {
                    if request_tx.send(request).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("client disconnected");
                    break;
                }
                Err(e) => {
                    warn!(?e, "failed to read request");
                    break;
                }
            }
        }
    });

    let mut subscription: Option<broadcast::Receiver<HotkeyEvent>> = None;
    let result = loop {
        tokio::select! {
            request = request_rx.recv() => {
                let Some(request) = request else { break Ok(()) };
                debug!(?request, "received request");
                if matches!(request, Request::Subscribe) && subscription.is_none() {
                    subscription = Some(events.subscribe());
                    debug!("client subscribed to notifications");
                }
                let response = process_request(request, &controller, start_time).await;
                if let Err(e) = send_message(&mut writer, &response).await {
                    break Err(e);
                }
            }
            event = next_event(&mut subscription) => match event {
                Ok(event) => {
                    if let Err(e) = send_message(&mut writer, &Notification::Hotkey { event }).await {
                        break Err(e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    subscription = None;
                }
            },
        }
    };

    read_task.abort();
    result
}

/// Wait for the next hotkey event, or forever if not subscribed
async fn next_event(
    subscription: &mut Option<broadcast::Receiver<HotkeyEvent>>,
) -> Result<HotkeyEvent, broadcast::error::RecvError> {
    match subscription {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read one length-prefixed request; `None` on clean disconnect
async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Request>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("message too large: {len} bytes");
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;

    let request = serde_json::from_slice(&msg_buf).context("failed to parse request")?;
    Ok(Some(request))
}

/// Send a length-prefixed JSON message
async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;
    writer.flush().await?;

    Ok(())
}

/// Process a request and return a response
async fn process_request(
    request: Request,
    controller: &ControllerHandle,
    start_time: Instant,
) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::GetStatus => match controller.status().await {
            Ok(engine) => {
                Response::Status(DaemonStatus::from_engine(engine, start_time.elapsed().as_secs()))
            }
            Err(e) => e.into(),
        },

        Request::Arm { shortcut } => match controller.arm(shortcut).await {
            Ok(shortcut) => Response::Armed { shortcut },
            Err(e) => e.into(),
        },

        Request::Disarm => match controller.disarm().await {
            Ok(()) => Response::Disarmed,
            Err(e) => e.into(),
        },

        Request::SetRecording { enabled } => match controller.set_recording(enabled).await {
            Ok(()) => Response::Recording { enabled },
            Err(e) => e.into(),
        },

        Request::Subscribe => Response::Subscribed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::{dispatch_channel, HookBackend, HookChannel, HookCore, HookError, UsLayout};
    use crate::state::Controller;
    use std::sync::Arc;

    struct NoopBackend;

    impl HookBackend for NoopBackend {
        fn install(&mut self, _core: Arc<HookCore>) -> Result<(), HookError> {
            Ok(())
        }

        fn uninstall(&mut self) {}
    }

    fn start_controller() -> (ControllerHandle, broadcast::Sender<HotkeyEvent>) {
        let layout = Arc::new(UsLayout);
        let (poster, dispatcher) = dispatch_channel(layout.clone());
        let channel = HookChannel::new(NoopBackend, poster);
        let (events, _) = broadcast::channel(16);
        let (controller, handle, commands) = Controller::new(channel, layout, events.clone());
        tokio::spawn(controller.run(commands, dispatcher));
        (handle, events)
    }

    async fn roundtrip<S>(client: &mut S, value: serde_json::Value) -> serde_json::Value
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        send_message(client, &value).await.unwrap();
        read_json(client).await
    }

    async fn read_json<S: AsyncRead + Unpin>(client: &mut S) -> serde_json::Value {
        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        let mut buf = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        client.read_exact(&mut buf).await.unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    #[tokio::test]
    async fn test_request_response_cycle() {
        let (controller, events) = start_controller();
        let (mut client, server_side) = tokio::io::duplex(4096);
        tokio::spawn(handle_client(server_side, controller, events, Instant::now()));

        let resp = roundtrip(&mut client, serde_json::json!({"type": "ping"})).await;
        assert_eq!(resp["type"], "pong");

        let resp = roundtrip(
            &mut client,
            serde_json::json!({"type": "arm", "shortcut": "alt+space"}),
        )
        .await;
        assert_eq!(resp["type"], "armed");
        assert_eq!(resp["shortcut"], "Alt+Space");

        let resp = roundtrip(
            &mut client,
            serde_json::json!({"type": "arm", "shortcut": "Ctrl+Shift"}),
        )
        .await;
        assert_eq!(resp["type"], "error");
        assert_eq!(resp["code"], "invalid_shortcut");

        let resp = roundtrip(&mut client, serde_json::json!({"type": "get_status"})).await;
        assert_eq!(resp["type"], "status");
        assert_eq!(resp["mode"], "armed");
        assert_eq!(resp["shortcut"], "Alt+Space");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_removes_socket() {
        let data_dir =
            std::env::temp_dir().join(format!("keychord-server-test-{}", std::process::id()));
        let config = Config {
            socket_path: data_dir.join("daemon.sock"),
            tcp_addr: "127.0.0.1:0".parse().unwrap(),
            data_dir: data_dir.clone(),
            shortcut: None,
        };
        let (controller, events) = start_controller();

        let server = Server::bind(&config, controller, events).unwrap();
        assert!(config.socket_path.exists());

        server.shutdown().await;
        assert!(!config.socket_path.exists());
        let _ = std::fs::remove_dir_all(&data_dir);
    }

    #[tokio::test]
    async fn test_subscribed_client_receives_events() {
        let (controller, events) = start_controller();
        let (mut client, server_side) = tokio::io::duplex(4096);
        tokio::spawn(handle_client(
            server_side,
            controller,
            events.clone(),
            Instant::now(),
        ));

        let resp = roundtrip(&mut client, serde_json::json!({"type": "subscribe"})).await;
        assert_eq!(resp["type"], "subscribed");

        events
            .send(HotkeyEvent::Captured {
                display: "Ctrl+Alt+K".into(),
            })
            .unwrap();

        let pushed = read_json(&mut client).await;
        assert_eq!(pushed["type"], "hotkey");
        assert_eq!(pushed["event"]["type"], "captured");
        assert_eq!(pushed["event"]["display"], "Ctrl+Alt+K");
    }
}
