pub mod bolt;
pub mod channel;
pub mod error;
pub mod packstream;
pub mod server;
pub mod transport;
pub mod util;

pub use channel::{Channel, HandshakeConfig, HandshakeMode};
pub use error::StubError;
pub use server::{ServerConfig, StubServer, auto_session};
