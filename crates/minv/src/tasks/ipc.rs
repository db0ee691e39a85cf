//! Blocking local-socket or TCP transport between callers and the daemon.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::Settings;
use crate::error::IpcError;
use crate::tasks::context::ReloadNotifier;
use crate::tasks::protocol::{read_frame, write_frame, Reply, Request};

/// How long either side waits for the peer's frame.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    /// The endpoint selected by `daemon.socket_path` or `daemon.port`.
    pub fn from_settings(settings: &Settings) -> Self {
        match (&settings.daemon.socket_path, settings.daemon.port) {
            (Some(path), _) => Endpoint::Unix(path.clone()),
            (None, Some(port)) => Endpoint::Tcp {
                host: settings.daemon.host.clone(),
                port,
            },
            (None, None) => Endpoint::Unix(settings.data_dir.join("daemon.sock")),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

pub enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    pub fn connect(endpoint: &Endpoint) -> Result<Self, IpcError> {
        let stream = match endpoint {
            Endpoint::Unix(path) => UnixStream::connect(path).map(Stream::Unix),
            Endpoint::Tcp { host, port } => {
                TcpStream::connect((host.as_str(), *port)).map(Stream::Tcp)
            }
        }
        .map_err(|e| IpcError::Connect {
            endpoint: endpoint.to_string(),
            source: e,
        })?;
        stream.set_timeout(Some(IO_TIMEOUT))?;
        Ok(stream)
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Stream::Unix(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)
            }
            Stream::Tcp(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)
            }
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => s.read(buf),
            Stream::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => s.write(buf),
            Stream::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Unix(s) => s.flush(),
            Stream::Tcp(s) => s.flush(),
        }
    }
}

/// Bound daemon endpoint. A local socket file is removed again on drop.
pub struct Listener {
    inner: ListenerKind,
    endpoint: Endpoint,
}

enum ListenerKind {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl Listener {
    pub fn bind(endpoint: &Endpoint) -> Result<Self, IpcError> {
        let bind_err = |e: io::Error| IpcError::Bind {
            endpoint: endpoint.to_string(),
            source: e,
        };

        let (inner, endpoint) = match endpoint {
            Endpoint::Unix(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(bind_err)?;
                }
                if path.exists() {
                    warn!("Removing stale socket {}", path.display());
                    std::fs::remove_file(path).map_err(bind_err)?;
                }
                let listener = UnixListener::bind(path).map_err(bind_err)?;
                restrict_to_owner(path).map_err(bind_err)?;
                (ListenerKind::Unix(listener), endpoint.clone())
            }
            Endpoint::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port)).map_err(bind_err)?;
                let port = listener.local_addr().map_err(bind_err)?.port();
                let bound = Endpoint::Tcp {
                    host: host.clone(),
                    port,
                };
                (ListenerKind::Tcp(listener), bound)
            }
        };

        info!("Listening on {}", endpoint);
        Ok(Self { inner, endpoint })
    }

    /// The bound endpoint, with the actual port for TCP port 0.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Blocks until a client connects.
    pub fn accept(&self) -> io::Result<Stream> {
        let stream = match &self.inner {
            ListenerKind::Unix(l) => l.accept().map(|(s, _)| Stream::Unix(s))?,
            ListenerKind::Tcp(l) => l.accept().map(|(s, _)| Stream::Tcp(s))?,
        };
        stream.set_timeout(Some(IO_TIMEOUT))?;
        Ok(stream)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Endpoint::Unix(path) = &self.endpoint {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Removed socket {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove socket {}: {}", path.display(), e),
            }
        }
    }
}

fn restrict_to_owner(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

/// Sends control requests to a running daemon, one connection each.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    endpoint: Endpoint,
}

impl DaemonClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(Endpoint::from_settings(settings))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn request(&self, request: &Request) -> Result<(), IpcError> {
        let mut stream = Stream::connect(&self.endpoint)?;
        write_frame(&mut stream, request)?;
        let reply: Reply = read_frame(&mut stream)?;
        reply.into_result()
    }

    pub fn send_reload_schedule(&self) -> Result<(), IpcError> {
        self.request(&Request::Reload)
    }

    pub fn send_restart_job(&self, job_id: &str) -> Result<(), IpcError> {
        self.request(&Request::Restart {
            job_id: job_id.to_string(),
        })
    }

    pub fn send_abort_job(&self, job_id: &str) -> Result<(), IpcError> {
        self.request(&Request::Abort {
            job_id: job_id.to_string(),
        })
    }
}

impl ReloadNotifier for DaemonClient {
    fn notify_reload(&self) -> Result<(), IpcError> {
        self.send_reload_schedule()
    }
}
