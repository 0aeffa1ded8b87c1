use std::fmt::Debug;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

/// Reliable byte stream used by a console connection.
pub trait ConsoleStream: Debug {
    /// Reads what is available without blocking.
    ///
    /// Returns `Ok(None)` when nothing is pending and `Ok(Some(0))` once the remote end closed.
    fn try_read(&mut self, buffer: &mut [u8]) -> io::Result<Option<usize>>;

    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    fn close(&mut self);
}

/// Source of new console streams.
pub trait ConsoleListener: Debug {
    fn addr(&self) -> io::Result<SocketAddr>;

    /// Returns the next pending stream, or `Ok(None)` if nobody is waiting.
    fn try_accept(&mut self) -> io::Result<Option<(Box<dyn ConsoleStream>, SocketAddr)>>;
}

impl ConsoleStream for TcpStream {
    fn try_read(&mut self, buffer: &mut [u8]) -> io::Result<Option<usize>> {
        match self.read(buffer) {
            Ok(len) => Ok(Some(len)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data)
    }

    fn close(&mut self) {
        if let Err(e) = TcpStream::shutdown(self, Shutdown::Both) {
            log::trace!("Failed to shutdown console stream: {}", e);
        }
    }
}

impl ConsoleListener for TcpListener {
    fn addr(&self) -> io::Result<SocketAddr> {
        self.local_addr()
    }

    fn try_accept(&mut self) -> io::Result<Option<(Box<dyn ConsoleStream>, SocketAddr)>> {
        self.set_nonblocking(true)?;
        match self.accept() {
            Ok((stream, addr)) => {
                stream.set_nonblocking(true)?;
                Ok(Some((Box::new(stream), addr)))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e),
        }
    }
}
