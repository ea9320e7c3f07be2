//! Types shared by the real-time gateway and its clients: ids, room names,
//! the channel wire protocol and the API error envelope.

pub mod domain;
pub mod error;
pub mod protocol;
