//! Loopback control listener.
//!
//! # Responsibilities
//! - Bind `127.0.0.1:<control.port>`
//! - Serve `Control.SetMaintenance` calls, one connection task each
//!
//! # Design Decisions
//! - Accepts are serial, calls on one connection are handled in order
//! - Transient accept errors are logged and the loop continues
//! - A terminal accept error or shutdown ends the loop
//! - The loop is generic over its connection source; production uses TCP

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::control::protocol::{
    bool_param, ControlRequest, ControlResponse, MAINTENANCE_OFF, MAINTENANCE_ON, SET_MAINTENANCE,
};
use crate::control::MaintenanceMode;

/// Longest request line accepted.
const MAX_LINE: usize = 64 * 1024;

/// Whether an accept error leaves the listener usable.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || is_fd_exhaustion(err)
}

fn is_fd_exhaustion(err: &io::Error) -> bool {
    // EMFILE / ENFILE
    matches!(err.raw_os_error(), Some(23) | Some(24))
}

/// Source of control connections.
trait Accept {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    type Stream = TcpStream;

    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Bound control listener.
#[derive(Debug)]
pub struct ControlListener {
    listener: TcpListener,
    maintenance: MaintenanceMode,
    token: Option<String>,
}

impl ControlListener {
    /// Bind the loopback port.
    pub async fn bind(
        port: u16,
        maintenance: MaintenanceMode,
        token: Option<String>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await?;
        Ok(Self {
            listener,
            maintenance,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown or a terminal error.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) {
        let addr = self.listener.local_addr().ok();
        tracing::info!(address = ?addr, "Control plane listening");
        accept_loop(&self.listener, &self.maintenance, self.token.as_deref(), shutdown).await;
    }
}

async fn accept_loop<A: Accept>(
    listener: &A,
    maintenance: &MaintenanceMode,
    token: Option<&str>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "Control connection accepted");
                    let maintenance = maintenance.clone();
                    let token = token.map(String::from);
                    tokio::spawn(async move {
                        if let Err(err) = serve_connection(stream, maintenance, token).await {
                            tracing::debug!(peer = %peer, error = %err, "Control connection ended");
                        }
                    });
                }
                Err(err) if is_transient(&err) => {
                    tracing::warn!(error = %err, "Transient control accept error");
                    if is_fd_exhaustion(&err) {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "Control listener failed");
                    break;
                }
            },
            _ = shutdown.recv() => {
                tracing::info!("Control plane received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

async fn serve_connection<S>(
    stream: S,
    maintenance: MaintenanceMode,
    token: Option<String>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);
    let mut line = String::new();

    loop {
        line.clear();
        let n = (&mut reader).take(MAX_LINE as u64).read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        if !line.ends_with('\n') && n >= MAX_LINE {
            let response = ControlResponse::err(0, "request too large");
            write_response(&mut write, &response).await?;
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => handle(request, &maintenance, token.as_deref()),
            Err(err) => ControlResponse::err(0, format!("invalid request: {err}")),
        };
        write_response(&mut write, &response).await?;
    }
}

async fn write_response<W>(write: &mut W, response: &ControlResponse) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_vec(response).map_err(io::Error::other)?;
    encoded.push(b'\n');
    write.write_all(&encoded).await?;
    write.flush().await
}

fn handle(request: ControlRequest, maintenance: &MaintenanceMode, token: Option<&str>) -> ControlResponse {
    if let Some(expected) = token {
        if request.token.as_deref() != Some(expected) {
            tracing::warn!(method = %request.method, "Rejected control call with bad token");
            return ControlResponse::err(request.id, "unauthorized");
        }
    }
    if request.method != SET_MAINTENANCE {
        return ControlResponse::err(request.id, format!("unknown method `{}`", request.method));
    }
    let Some(enabled) = bool_param(&request.params) else {
        return ControlResponse::err(request.id, "expected a boolean parameter");
    };

    maintenance.set(enabled);
    let message = if enabled { MAINTENANCE_ON } else { MAINTENANCE_OFF };
    ControlResponse::ok(request.id, message)
}
