//! Client half of the real-time layer: the reconnecting session channel, the
//! reconciler that folds server events and optimistic local actions into one
//! consistent state, the call state machine, and the storage REST client.

pub mod backoff;
pub mod call;
pub mod channel;
pub mod client;
pub mod error;
pub mod storage_api;
pub mod store;

pub use channel::{ChannelConfig, ChannelEvent, ChannelHandle, ConnectionState, SessionChannel};
pub use client::{ChatClient, ClientNotice};
pub use error::{CallError, ChannelError, ClientError, StorageError};
pub use storage_api::{HttpStorageApi, StorageApi};
pub use store::{ClientStore, Effect};
