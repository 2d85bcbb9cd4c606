//! Dialog identifier.
//!
//! This is the *handle* callers use to refer to a dialog (a UUID assigned at
//! creation time), distinct from [`crate::dialog::DialogKey`] which is the
//! (Call-ID, local-tag, remote-tag) triple the manager uses to look a dialog
//! up from an incoming message (Section 3 of the data model).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogId(Uuid);

impl DialogId {
    pub fn new() -> Self {
        DialogId(Uuid::new_v4())
    }
}

impl Default for DialogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The lookup key for an established or establishing dialog: Call-ID plus
/// both tags. `remote_tag` is empty until the first tag-bearing
/// response/request arrives, at which point the manager re-keys the dialog
/// exactly once (Section 3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogKey {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
}

impl DialogKey {
    pub fn new(call_id: impl Into<String>, local_tag: impl Into<String>, remote_tag: impl Into<String>) -> Self {
        DialogKey {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag: remote_tag.into(),
        }
    }

    /// The provisional key used before the remote tag is known (UAC case:
    /// our own tag is assigned up front, theirs arrives later).
    pub fn provisional(call_id: impl Into<String>, local_tag: impl Into<String>) -> Self {
        DialogKey::new(call_id, local_tag, String::new())
    }

    /// The provisional key used before our own tag is known (UAS case: the
    /// remote's tag is known immediately from the inbound INVITE's `From`,
    /// ours isn't assigned until we send a tag-bearing response).
    pub fn provisional_remote(call_id: impl Into<String>, remote_tag: impl Into<String>) -> Self {
        DialogKey::new(call_id, String::new(), remote_tag)
    }
}

impl fmt::Display for DialogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.call_id, self.local_tag, self.remote_tag)
    }
}
