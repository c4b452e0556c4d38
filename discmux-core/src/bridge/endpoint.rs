//! OS-level endpoints a transcoder can open as if they were files.

use crate::config::EndpointKind;
use log::{debug, trace};
use std::fs::File;
use std::io::{self, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A listening endpoint waiting for its consumer.
pub(crate) enum Listener {
    #[cfg(unix)]
    Fifo { path: PathBuf },
    Tcp { listener: TcpListener, addr: SocketAddr },
}

/// The producer side of an accepted endpoint.
pub(crate) enum Connection {
    File(File),
    Tcp(TcpStream),
}

/// Unblocks a bridge task stuck waiting for a consumer that will never come.
#[derive(Debug, Clone)]
pub(crate) enum Waker {
    #[cfg(unix)]
    Fifo(PathBuf),
    Tcp(SocketAddr),
}

impl Listener {
    /// Creates an endpoint named `name` (inside `dir` for FIFOs).
    pub(crate) fn create(kind: EndpointKind, dir: &Path, name: &str) -> io::Result<Self> {
        match kind {
            #[cfg(unix)]
            EndpointKind::Fifo => {
                use nix::sys::stat::Mode;

                let path = dir.join(name);
                nix::unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR)?;
                debug!("Created fifo {}", path.display());
                Ok(Listener::Fifo { path })
            }
            #[cfg(not(unix))]
            EndpointKind::Fifo => {
                let _ = (dir, name);
                Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "fifo endpoints require a unix platform",
                ))
            }
            EndpointKind::Tcp => {
                let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
                let addr = listener.local_addr()?;
                debug!("Listening for {name} on {addr}");
                Ok(Listener::Tcp { listener, addr })
            }
        }
    }

    /// Address to hand to the transcoder.
    pub(crate) fn address(&self) -> String {
        match self {
            #[cfg(unix)]
            Listener::Fifo { path } => path.to_string_lossy().into_owned(),
            Listener::Tcp { addr, .. } => format!("tcp://{addr}"),
        }
    }

    pub(crate) fn waker(&self) -> Waker {
        match self {
            #[cfg(unix)]
            Listener::Fifo { path } => Waker::Fifo(path.clone()),
            Listener::Tcp { addr, .. } => Waker::Tcp(*addr),
        }
    }

    /// Blocks until a consumer connects.
    pub(crate) fn accept(&self) -> io::Result<Connection> {
        match self {
            // Opening a FIFO for writing blocks until a reader opens it.
            #[cfg(unix)]
            Listener::Fifo { path } => Ok(Connection::File(
                std::fs::OpenOptions::new().write(true).open(path)?,
            )),
            Listener::Tcp { listener, .. } => {
                let (stream, peer) = listener.accept()?;
                trace!("Accepted consumer {peer}");
                Ok(Connection::Tcp(stream))
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        match self {
            #[cfg(unix)]
            Listener::Fifo { path } => {
                if let Err(e) = std::fs::remove_file(path.as_path()) {
                    trace!("Could not remove fifo {}: {e}", path.display());
                }
            }
            Listener::Tcp { .. } => {}
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::File(f) => f.write(buf),
            Connection::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::File(f) => f.flush(),
            Connection::Tcp(s) => s.flush(),
        }
    }
}

impl Connection {
    /// Half-closes a socket so the consumer sees end-of-file promptly.
    pub(crate) fn finish(self) {
        if let Connection::Tcp(stream) = self {
            let _ = stream.shutdown(std::net::Shutdown::Write);
        }
    }
}

impl Waker {
    /// Connects to the endpoint briefly so a blocked `accept` returns.
    pub(crate) fn wake(&self) {
        match self {
            #[cfg(unix)]
            Waker::Fifo(path) => {
                use std::os::unix::fs::OpenOptionsExt;

                // A non-blocking reader completes the writer's open without
                // ever blocking here; it is closed right away.
                let _ = std::fs::OpenOptions::new()
                    .read(true)
                    .custom_flags(nix::fcntl::OFlag::O_NONBLOCK.bits())
                    .open(path);
            }
            Waker::Tcp(addr) => {
                let _ = TcpStream::connect_timeout(addr, Duration::from_millis(250));
            }
        }
    }
}

/// Whether a write error means the consumer closed its end.
pub(crate) fn is_consumer_gone(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;

    #[test]
    fn test_tcp_endpoint_delivers_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let listener = Listener::create(EndpointKind::Tcp, dir.path(), "in0").unwrap();
        let address = listener.address();
        assert!(address.starts_with("tcp://127.0.0.1:"));

        let addr: SocketAddr = address.trim_start_matches("tcp://").parse().unwrap();
        let reader = thread::spawn(move || {
            let mut s = TcpStream::connect(addr).unwrap();
            let mut out = Vec::new();
            s.read_to_end(&mut out).unwrap();
            out
        });

        let mut conn = listener.accept().unwrap();
        conn.write_all(b"hello").unwrap();
        conn.finish();
        assert_eq!(reader.join().unwrap(), b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_fifo_endpoint_delivers_bytes_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let listener = Listener::create(EndpointKind::Fifo, dir.path(), "in0").unwrap();
        let path = PathBuf::from(listener.address());
        assert!(path.exists());

        let reader_path = path.clone();
        let reader = thread::spawn(move || std::fs::read(reader_path).unwrap());

        let mut conn = listener.accept().unwrap();
        conn.write_all(b"segment").unwrap();
        drop(conn);
        assert_eq!(reader.join().unwrap(), b"segment");

        drop(listener);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_waker_unblocks_fifo_accept() {
        let dir = tempfile::tempdir().unwrap();
        let listener = Listener::create(EndpointKind::Fifo, dir.path(), "idle").unwrap();
        let waker = listener.waker();

        let accepting = thread::spawn(move || listener.accept().is_ok());
        // Keep waking until the accept returns; the first wake may race the open.
        while !accepting.is_finished() {
            waker.wake();
            thread::sleep(Duration::from_millis(10));
        }
        assert!(accepting.join().unwrap());
    }

    #[test]
    fn test_consumer_gone_classification() {
        assert!(is_consumer_gone(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_consumer_gone(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_consumer_gone(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
