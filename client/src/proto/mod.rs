// proto implements the RFC 5766 wire pieces used on the relay data path.

pub mod chandata;
pub mod channum;
pub mod data;
pub mod peeraddr;
