pub mod agent;
pub mod attributes;
pub mod checks;
mod error;
pub mod error_code;
pub mod fingerprint;
pub mod integrity;
pub mod message;
pub mod textattrs;
pub mod xoraddr;

pub use error::Error;
