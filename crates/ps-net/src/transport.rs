//! Socket-level plumbing shared by the HTTP client and the connection pool.

use ps_core::PeriscopeError;
use ps_core::PeriscopeResult;
use std::io;
use std::io::Read;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::time::Duration;

/// Plain or TLS stream. `Send` so idle connections can move between
/// navigation workers through the shared pool.
pub trait IoStream: Read + Write + Send {}
impl<T> IoStream for T where T: Read + Write + Send {}

pub type BoxedIoStream = Box<dyn IoStream>;

/// Opens outbound TCP connections.
pub trait Transport: Send + Sync {
    /// `timeout` bounds the connect and every later socket read or write.
    fn connect(&self, address: SocketAddr, timeout: Duration) -> PeriscopeResult<TcpStream>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn connect(&self, address: SocketAddr, timeout: Duration) -> PeriscopeResult<TcpStream> {
        let stream = TcpStream::connect_timeout(&address, timeout).map_err(|error| {
            PeriscopeError::new(
                "net.transport.connect_failed",
                format!("failed to connect to `{address}`: {error}"),
            )
        })?;

        configure(&stream, timeout).map_err(|error| {
            PeriscopeError::new(
                "net.transport.socket_option_failed",
                format!("failed to configure socket for `{address}`: {error}"),
            )
        })?;

        Ok(stream)
    }
}

fn configure(stream: &TcpStream, timeout: Duration) -> io::Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))
}
