//! RFC 3261 §17 transaction layer: four finite state machines driven by
//! timers and matched to inbound messages by [`TransactionKey`] (Section
//! 4.2). Each transaction runs as its own background task; the
//! [`TransactionManager`] owns the lookup table and fans state changes back
//! to the dialog layer.

pub mod client_invite;
pub mod client_non_invite;
pub mod key;
pub mod manager;
pub mod server_invite;
pub mod server_non_invite;
pub mod state;
pub mod timer;

pub use client_invite::ClientInviteTransaction;
pub use client_non_invite::ClientNonInviteTransaction;
pub use key::{TransactionKey, TransactionRole};
pub use manager::TransactionManager;
pub use server_invite::ServerInviteTransaction;
pub use server_non_invite::ServerNonInviteTransaction;
pub use timer::TimerSettings;

use uasip_sip_types::Response;

/// What a transaction reports upward to its Transaction User (the dialog
/// layer, via [`TransactionManager`]). Retransmissions and duplicates are
/// absorbed below this point and never surface here (Section 7).
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// A provisional (1xx) response arrived.
    Provisional(Response),
    /// A 2xx final response arrived (client) or was sent (server, informational only).
    Success(Response),
    /// A non-2xx final response arrived (client) or was sent (server).
    Failure(Response),
    /// Timer B/F/H elapsed with no matching response.
    Timeout,
    /// The transport failed to deliver a message for this transaction.
    TransportError(String),
    /// The FSM reached `Terminated`; the manager may drop this entry.
    Terminated,
}
