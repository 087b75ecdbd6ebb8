pub mod client;
mod error;
pub mod proto;
pub mod stun;
pub mod transport;

pub use client::{Client, ClientConfig};
pub use error::{Error, IoError, Result};
pub use transport::Conn;
