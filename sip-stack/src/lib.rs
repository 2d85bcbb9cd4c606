//! User-agent facade wiring the transport, transaction, and dialog layers
//! (`uasip-sip-transport`, `uasip-dialog-core`) into the single surface a
//! transaction-user actually drives: [`Stack`] to bind and start a UA
//! instance, [`DialogHandle`] for the calls it creates or receives.
//!
//! This crate owns none of the protocol logic itself (Section 2 puts that
//! in the two crates below it); it is bookkeeping: per-dialog broadcast
//! channels for state/body notifications, destination-address tracking for
//! in-dialog sends, and URI resolution for `NewInvite`.

pub mod cancellation;
pub mod config;
pub mod dialog_handle;
pub mod error;
pub mod stack;

pub use cancellation::CancellationToken;
pub use config::StackConfig;
pub use dialog_handle::DialogHandle;
pub use error::{StackError, StackResult};
pub use stack::Stack;

pub use uasip_dialog_core::{DialogInfo, DialogState, ReferOptions, ReferProgress, ReferSubscription, SubscriptionState};
pub use uasip_sip_transport::factory::TransportType;
pub use uasip_sip_types::{Method, Request, Response, StatusCode, Uri};

pub mod prelude {
    pub use crate::{CancellationToken, DialogHandle, Stack, StackConfig, StackError, StackResult};
    pub use uasip_dialog_core::{DialogInfo, DialogState, ReferOptions};
    pub use uasip_sip_types::{Method, StatusCode, Uri};
}
