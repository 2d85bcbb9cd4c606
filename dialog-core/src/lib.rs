//! RFC 3261 transaction and dialog layers, with the RFC 3515 REFER
//! subscription extension.
//!
//! This crate sits between [`uasip_sip_transport`], which only knows how to
//! frame and move bytes, and a user agent's transaction-user logic. It
//! implements:
//!
//! - [`transaction`]: the four RFC 3261 transaction state machines (Section
//!   4.2), matching inbound messages and driving retransmission/timeout
//!   timers.
//! - [`dialog`]: the RFC 3261 dialog data model (Section 4.3) and the
//!   [`dialog::DialogManager`] that creates dialogs, re-keys them once both
//!   tags are known, and routes messages to the dialog (or fresh server
//!   transaction) they belong to.
//! - RFC 3515 blind transfer (REFER/NOTIFY), tracked per dialog in
//!   [`dialog::subscription`].
//!
//! A transaction never talks to a dialog directly; everything flows through
//! [`transaction::manager::TransactionManager::route_inbound`] and the
//! [`dialog::DialogEvent`]s the manager reports upward.

pub mod dialog;
pub mod errors;
pub mod transaction;

pub use dialog::{
    Dialog, DialogEvent, DialogId, DialogInfo, DialogKey, DialogManager, DialogRole, DialogState, ReferOptions,
    ReferProgress, ReferSubscription, SubscriptionState,
};
pub use errors::{DialogError, DialogResult};
pub use transaction::{
    ClientInviteTransaction, ClientNonInviteTransaction, ServerInviteTransaction, ServerNonInviteTransaction,
    TransactionEvent, TransactionKey, TransactionManager,
};

pub mod prelude {
    pub use crate::{
        Dialog, DialogError, DialogEvent, DialogId, DialogManager, DialogResult, DialogState, ReferOptions,
        TransactionEvent, TransactionManager,
    };
}
