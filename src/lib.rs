//! A usbmuxd protocol client plus the small pieces needed to turn it into an
//! HTTP-proxy dialer: a live device registry kept in sync from usbmuxd's
//! attach/detach event stream, and a tunnel factory that turns a `Connect`
//! request into a plain byte-stream socket.
//!
//! The HTTP proxy itself — request rewriting, `CONNECT` handling,
//! `Proxy-Authorization`, and so on — is out of scope for this crate. It is
//! expected to be built on top of [`Dialer`], the one type here that external
//! code is meant to hold onto.

pub mod dialer;
pub mod error;
pub mod registry;
pub mod tunnel;
pub mod usbmuxd;

pub use dialer::Dialer;
pub use error::{MuxError, Result};
pub use registry::{DetachPolicy, DeviceRegistry};
pub use usbmuxd::{Connection, UsbDevice, UsbmuxdAddr};

use tokio::io::{AsyncRead, AsyncWrite};

/// Anything that can stand in for a usbmuxd-owned socket: a Unix stream, a
/// TCP stream, or a boxed trait object wrapping either.
///
/// Tokio's `UnixStream` and `TcpStream` both implement this trait for free.
pub trait ReadWrite: AsyncRead + AsyncWrite + Unpin + Send + Sync + std::fmt::Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + std::fmt::Debug> ReadWrite for T {}

/// A tunnel handed back to the caller by [`tunnel::open_tunnel`] or
/// [`Dialer::dial`]. usbmuxd framing is never used on this socket again.
pub type Socket = Box<dyn ReadWrite>;
