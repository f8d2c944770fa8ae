//! Wire codec (C1): RESP frame parsing and serialization over a TCP
//! connection, see spec §4.1.

mod connection;
mod frame;

pub use connection::Connection;
pub use frame::{Frame, Limits};
