//! Payment Channel Entity: a pure value object reconciling a locally stored
//! row with on-chain state.
//!
//! [`crate::repository::reconcile`] is the only constructor callers should
//! use in practice. The plain [`PaymentChannel`](crate::model::PaymentChannel)
//! returned there already carries the derived fields this module exposes;
//! this type exists so call sites can express "a channel view, as of a
//! specific chain read" distinctly from "a channel row, as last persisted".

pub use crate::model::PaymentChannel as PaymentChannelView;
