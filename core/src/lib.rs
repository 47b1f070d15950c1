//! `paychan-core`: the off-chain unidirectional payment channel protocol
//! engine. Transport-agnostic and chain-agnostic behind the
//! [`contract::ContractAdapter`] and `*Repository` trait seams. The
//! `paychan-gateway` binary supplies the HTTP surface and concrete
//! back-ends.

pub mod channel;
pub mod contract;
pub mod digest;
pub mod error;
pub mod lock;
pub mod manager;
pub mod model;
pub mod repository;

pub use error::{CoreError, Result};
pub use manager::{ChannelManager, ManagerConfig};
pub use model::{ChannelId, ChannelState, ContractKind, OnChainChannel, Payment, PaymentChannel, TxResult};
pub use repository::{
    reconcile, ChannelsRepository, InMemoryChannelsRepository, InMemoryPaymentsRepository, PaymentsRepository,
    Role, SharedChannelsRepository, SharedPaymentsRepository,
};
