//! Per-FSM-family state enums (Sections 4.2.2–4.2.5).

use std::fmt;

macro_rules! state_enum {
    ($name:ident { $($variant:ident),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn is_terminated(&self) -> bool {
                matches!(self, $name::Terminated)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{self:?}")
            }
        }
    };
}

state_enum!(ClientInviteState { Calling, Proceeding, Completed, Terminated });
state_enum!(ClientNonInviteState { Trying, Proceeding, Completed, Terminated });
state_enum!(ServerInviteState { Proceeding, Completed, Confirmed, Terminated });
state_enum!(ServerNonInviteState { Trying, Proceeding, Completed, Terminated });
