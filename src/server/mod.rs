//! TCP front end of the stub server.
//!
//! This module accepts driver connections and drives one [`Channel`] per
//! connection from start to finish: preamble, version handshake, then a
//! session handler that decides what the conversation looks like.
//!
//! # Overview
//!
//! The session handler is the seam where a script interpreter plugs in. Any
//! `Fn(&mut Channel<SocketWire>) -> Result<(), StubError>` works; the crate
//! ships [`auto_session`], which only answers protocol housekeeping.
//!
//! Connections never share state. Each one is handed to a worker of a fixed
//! size [`ThreadPool`] and runs there on a single thread; a fault ends that
//! connection only and is logged at a level matching its kind.
//!
//! # See Also
//!
//! - [`channel`](crate::channel): handshake and message exchange per connection.
//!
//! [`Channel`]: crate::channel::Channel
//! [`SocketWire`]: crate::transport::SocketWire
//! [`StubError`]: crate::error::StubError
mod server;
mod session;
mod thread;

use thread::ThreadPool;

pub use server::{ServerConfig, StubServer};
pub use session::{AUTO_MESSAGES, auto_session};
