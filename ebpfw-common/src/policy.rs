//! Default-deny policy with a destination-port allow-list
//!
//! Only consulted for inbound traffic that matched no tracked session.

use crate::{dispatch::Reason, tables::PolicySource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Accept; the reason is [`Reason::DefaultAllowed`] or [`Reason::PortAllowed`]
    Allow(Reason),
    Deny,
}

/// Evaluate the policy for a packet addressed to `dst_port`.
///
/// Deny mode and the allow-list are read separately; a control-plane write
/// may land between the two reads and either outcome is acceptable.
#[inline(always)]
pub fn evaluate<P: PolicySource + ?Sized>(policy: &P, dst_port: u16) -> PolicyDecision {
    if !policy.deny_mode() {
        return PolicyDecision::Allow(Reason::DefaultAllowed);
    }
    if policy.port_allowed(dst_port) {
        PolicyDecision::Allow(Reason::PortAllowed)
    } else {
        PolicyDecision::Deny
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Static {
        deny: bool,
        ports: &'static [u16],
    }

    impl PolicySource for Static {
        fn deny_mode(&self) -> bool {
            self.deny
        }

        fn port_allowed(&self, port: u16) -> bool {
            self.ports.contains(&port)
        }
    }

    #[test]
    fn test_allow_all_when_deny_mode_off() {
        let policy = Static {
            deny: false,
            ports: &[],
        };
        assert_eq!(
            evaluate(&policy, 22),
            PolicyDecision::Allow(Reason::DefaultAllowed)
        );
    }

    #[test]
    fn test_allow_list_in_deny_mode() {
        let policy = Static {
            deny: true,
            ports: &[443],
        };
        assert_eq!(
            evaluate(&policy, 443),
            PolicyDecision::Allow(Reason::PortAllowed)
        );
        assert_eq!(evaluate(&policy, 22), PolicyDecision::Deny);
    }
}
