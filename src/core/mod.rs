//! Domain model: messages, channel references, and transactions.

pub mod message;
pub mod reference;
pub mod transaction;

pub use message::{
    HeaderValue, Headers, Message, MessageHandle, MessageId, StoredMessage, decode_headers,
    encode_headers,
};
pub use reference::{
    ChannelId, InitialLoadInfo, MessageReference, PagingWindow, RefState, ReferenceInfo,
};
pub use transaction::{
    PreparedTransaction, Transaction, TransactionId, TxCallback, TxState, Xid,
};
