//! Duplex connections the multiplexer can run over.
//!
//! The dispatch loop needs an owned read half while callers write through an
//! independently owned write half, so a connection must be splittable. Socket
//! types split with `try_clone`; arbitrary `Read`/`Write` pairs can bypass
//! this module through [`crate::Multiplexer::from_halves`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Closes a connection from outside the thread blocked reading it.
pub trait StreamCloser: Send + Sync {
    /// Shuts down both directions of the connection.
    ///
    /// # Errors
    ///
    /// Returns the operating system error when the shutdown fails, for
    /// example because the peer already disconnected.
    fn close(&self) -> io::Result<()>;
}

impl StreamCloser for TcpStream {
    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

#[cfg(unix)]
impl StreamCloser for UnixStream {
    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// Independently owned halves of a duplex connection.
pub struct StreamHalves<R, W> {
    /// Half handed to the dispatch loop.
    pub reader: R,
    /// Half guarded by the writer lock.
    pub writer: W,
    /// Used by [`crate::Multiplexer::shutdown`] to unblock the reader.
    pub closer: Option<Box<dyn StreamCloser>>,
}

/// A duplex connection that can be split into read and write halves.
pub trait SplitStream {
    /// Read half type.
    type Reader: Read + Send + 'static;
    /// Write half type.
    type Writer: Write + Send + 'static;

    /// Splits the connection.
    ///
    /// # Errors
    ///
    /// Returns the error raised while duplicating the underlying handle.
    fn split(self) -> io::Result<StreamHalves<Self::Reader, Self::Writer>>;
}

impl SplitStream for TcpStream {
    type Reader = Self;
    type Writer = Self;

    fn split(self) -> io::Result<StreamHalves<Self, Self>> {
        let reader = self.try_clone()?;
        let closer = self.try_clone()?;
        Ok(StreamHalves {
            reader,
            writer: self,
            closer: Some(Box::new(closer)),
        })
    }
}

#[cfg(unix)]
impl SplitStream for UnixStream {
    type Reader = Self;
    type Writer = Self;

    fn split(self) -> io::Result<StreamHalves<Self, Self>> {
        let reader = self.try_clone()?;
        let closer = self.try_clone()?;
        Ok(StreamHalves {
            reader,
            writer: self,
            closer: Some(Box::new(closer)),
        })
    }
}

/// Socket connected to the daemon, chosen at runtime.
#[derive(Debug)]
pub enum DaemonStream {
    /// TCP connection.
    Tcp(TcpStream),
    /// Unix domain socket connection.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl DaemonStream {
    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(stream) => stream.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(stream) => stream.try_clone().map(Self::Unix),
        }
    }
}

impl From<TcpStream> for DaemonStream {
    fn from(stream: TcpStream) -> Self {
        Self::Tcp(stream)
    }
}

#[cfg(unix)]
impl From<UnixStream> for DaemonStream {
    fn from(stream: UnixStream) -> Self {
        Self::Unix(stream)
    }
}

impl Read for DaemonStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for DaemonStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

impl StreamCloser for DaemonStream {
    fn close(&self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.close(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.close(),
        }
    }
}

impl SplitStream for DaemonStream {
    type Reader = Self;
    type Writer = Self;

    fn split(self) -> io::Result<StreamHalves<Self, Self>> {
        let reader = self.try_clone()?;
        let closer = self.try_clone()?;
        Ok(StreamHalves {
            reader,
            writer: self,
            closer: Some(Box::new(closer)),
        })
    }
}
