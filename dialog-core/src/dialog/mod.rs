//! Core dialog types and functionality
//!
//! This module contains the core dialog types and operations for RFC 3261 SIP dialogs:
//!
//! - [`DialogId`]: Unique UUID-based identifiers for dialogs
//! - [`Dialog`]: Main dialog implementation with state management
//! - [`DialogState`]: Dialog lifecycle states (Init, Trying, Early, Confirmed, ...)
//! - [`subscription`]: RFC 3515 REFER subscription tracking
//! - [`dialog_utils`]: Utility functions for SIP parsing and URI handling
//!
//! ## Dialog Lifecycle
//!
//! ```text
//! Init → Trying → Early → Confirmed → Terminating → Terminated
//! ```
//!
//! Dialogs are created and looked up through [`manager::DialogManager`], which
//! also owns the transaction layer each dialog's requests are sent through.

pub mod dialog_id;
pub mod dialog_impl;
pub mod dialog_state;
pub mod dialog_utils;
pub mod manager;
pub mod subscription;

pub use dialog_id::{DialogId, DialogKey};
pub use dialog_impl::{Dialog, DialogRole};
pub use dialog_state::DialogState;
pub use dialog_utils::*;
pub use manager::{DialogEvent, DialogInfo, DialogManager, ReferOptions};
pub use subscription::{ReferProgress, ReferSubscription, SubscriptionState};
