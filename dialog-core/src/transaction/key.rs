//! Transaction matching key (Section 4.2.1).

use std::fmt;

use uasip_sip_types::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionRole {
    Client,
    Server,
}

/// `(branch, method, client|server)`. An ACK for a non-2xx response matches
/// the INVITE server transaction under the INVITE's own key (Section 4.2.1);
/// ACKs for 2xx never match a transaction at all and go straight to the
/// dialog layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub branch: String,
    pub method: Method,
    pub role: TransactionRole,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, method: Method, role: TransactionRole) -> Self {
        TransactionKey {
            branch: branch.into(),
            method,
            role,
        }
    }

    /// The key under which an ACK for a non-2xx final response looks up its
    /// INVITE server transaction: same branch, slotted as `Invite`.
    pub fn for_ack(branch: impl Into<String>, role: TransactionRole) -> Self {
        TransactionKey::new(branch, Method::Invite, role)
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            TransactionRole::Client => "client",
            TransactionRole::Server => "server",
        };
        write!(f, "{}/{}/{role}", self.branch, self.method)
    }
}
