//! Standard-library implementations of the platform collaborators.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use embedded_time::rate::Fraction;
use embedded_time::Instant;

use crate::net::{Addrd, Socket};

/// A millisecond monotonic clock counting from process start.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
  start: std::time::Instant,
}

impl SystemClock {
  /// Create a clock anchored at "now".
  #[allow(clippy::new_without_default)]
  pub fn new() -> Self {
    Self { start: std::time::Instant::now() }
  }
}

impl embedded_time::Clock for SystemClock {
  type T = u64;

  const SCALING_FACTOR: Fraction = Fraction::new(1, 1000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    Ok(Instant::new(self.start.elapsed().as_millis() as u64))
  }
}

/// [`Socket`] over a non-blocking [`UdpSocket`].
#[derive(Debug)]
pub struct StdSocket {
  sock: UdpSocket,
}

impl StdSocket {
  /// Bind to an address and switch to non-blocking mode.
  pub fn bind<A: ToSocketAddrs>(addr: A) -> std::io::Result<Self> {
    let sock = UdpSocket::bind(addr)?;
    sock.set_nonblocking(true)?;
    Ok(Self { sock })
  }
}

impl Socket for StdSocket {
  type Error = std::io::Error;

  fn local_addr(&self) -> SocketAddr {
    self.sock
        .local_addr()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)))
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    match self.sock.send_to(msg.data(), msg.addr()) {
      | Ok(_) => Ok(()),
      | Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(nb::Error::WouldBlock),
      | Err(e) => Err(nb::Error::Other(e)),
    }
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    match self.sock.recv_from(buffer) {
      | Ok((n, addr)) => Ok(Addrd(n, addr)),
      | Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(nb::Error::WouldBlock),
      | Err(e) => Err(nb::Error::Other(e)),
    }
  }
}
