//! Per-packet decision paths
//!
//! - egress: session bookkeeping for packets leaving the host, never drops
//! - ingress: session lookup for packets entering the host, then policy
//! - combined: one hook for both directions, split by source address
//!
//! A frame that fails to parse is passed without touching any table.

use crate::{
    headers::{parse_frame, PacketView, ParsedHeaders},
    key::{derive_endpoint_key, SessionKey},
    policy::{self, PolicyDecision},
    tables::{AttemptLedger, EventSink, LocalAddrs, PolicySource, SessionTable},
    FlowEvent,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Drop,
}

/// Why a verdict was reached. Exported in [`FlowEvent::reason`].
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reason {
    /// Headers could not be parsed; passed untouched
    Malformed = 0,
    /// Egress path, which only maintains the session table
    Bookkeeping = 1,
    /// Combined path, packet sent by the protected host
    Outgoing = 2,
    /// Return traffic of a tracked session
    Session = 3,
    /// No session, destination port is allow-listed
    PortAllowed = 4,
    /// No session, deny mode is off
    DefaultAllowed = 5,
    /// No session, deny mode is on and the port is not allow-listed
    Denied = 6,
}

impl Reason {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Reason::Malformed,
            1 => Reason::Bookkeeping,
            2 => Reason::Outgoing,
            3 => Reason::Session,
            4 => Reason::PortAllowed,
            5 => Reason::DefaultAllowed,
            6 => Reason::Denied,
            _ => return None,
        })
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Reason::Malformed => "malformed",
            Reason::Bookkeeping => "bookkeeping",
            Reason::Outgoing => "outgoing",
            Reason::Session => "session",
            Reason::PortAllowed => "port-allowed",
            Reason::DefaultAllowed => "default-allowed",
            Reason::Denied => "denied",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    pub reason: Reason,
}

impl Decision {
    const fn pass(reason: Reason) -> Self {
        Self {
            verdict: Verdict::Pass,
            reason,
        }
    }

    const fn drop(reason: Reason) -> Self {
        Self {
            verdict: Verdict::Drop,
            reason,
        }
    }
}

/// Bundles the stores one program needs.
///
/// The eBPF programs build one per invocation from zero-sized map handles;
/// userspace holds references to shared in-process tables.
pub struct Dispatcher<S, L, P, E> {
    sessions: S,
    ledger: L,
    policy: P,
    events: E,
}

impl<S, L, P, E> Dispatcher<S, L, P, E> {
    pub const fn new(sessions: S, ledger: L, policy: P, events: E) -> Self {
        Self {
            sessions,
            ledger,
            policy,
            events,
        }
    }
}

impl<S, L, P, E> Dispatcher<S, L, P, E>
where
    L: AttemptLedger,
    P: PolicySource,
    E: EventSink,
{
    /// Policy fallback for inbound traffic without a session.
    fn apply_policy(&self, headers: &ParsedHeaders) -> Decision {
        match policy::evaluate(&self.policy, headers.dst_port) {
            PolicyDecision::Allow(reason) => {
                self.events.emit(&FlowEvent::new(headers, reason));
                Decision::pass(reason)
            }
            PolicyDecision::Deny => {
                // a full ledger loses the record, never the drop
                let _ = self
                    .ledger
                    .record_attempt(headers.src_addr, headers.dst_addr);
                Decision::drop(Reason::Denied)
            }
        }
    }
}

impl<S, L, P, E> Dispatcher<S, L, P, E>
where
    S: SessionTable<SessionKey>,
    L: AttemptLedger,
    P: PolicySource,
    E: EventSink,
{
    /// Packet leaving the protected host.
    pub fn egress<V: PacketView + ?Sized>(&self, frame: &V) -> Decision {
        let headers = match parse_frame(frame) {
            Ok(headers) => headers,
            Err(_) => return Decision::pass(Reason::Malformed),
        };

        if let Some(flags) = headers.tcp_flags() {
            let key = SessionKey::egress(&headers);
            if flags.opens_session() {
                // a full table leaves the session untracked; egress still passes
                let _ = self.sessions.insert(&key);
            }
            if flags.closes_session() {
                self.sessions.remove(&key);
            }
        }

        Decision::pass(Reason::Bookkeeping)
    }

    /// Packet entering the protected host.
    pub fn ingress<V: PacketView + ?Sized>(&self, frame: &V) -> Decision {
        let headers = match parse_frame(frame) {
            Ok(headers) => headers,
            Err(_) => return Decision::pass(Reason::Malformed),
        };

        if let Some(flags) = headers.tcp_flags() {
            let key = SessionKey::ingress(&headers);
            if self.sessions.contains(&key) {
                if flags.closes_session() {
                    self.sessions.remove(&key);
                }
                return Decision::pass(Reason::Session);
            }
        }

        self.apply_policy(&headers)
    }
}

impl<S, L, P, E> Dispatcher<S, L, P, E>
where
    S: SessionTable<u64>,
    L: AttemptLedger,
    P: PolicySource,
    E: EventSink,
{
    /// Single hook for both directions. Packets sourced from one of `local`
    /// are outgoing and remember their destination endpoint; everything else
    /// is incoming and passes if it comes from a remembered endpoint.
    ///
    /// TCP endpoints are remembered on an opening SYN and forgotten on
    /// FIN or RST+ACK from either side. UDP endpoints are remembered on every
    /// outgoing datagram and never forgotten.
    pub fn combined<V, A>(&self, frame: &V, local: &A) -> Decision
    where
        V: PacketView + ?Sized,
        A: LocalAddrs + ?Sized,
    {
        let headers = match parse_frame(frame) {
            Ok(headers) => headers,
            Err(_) => return Decision::pass(Reason::Malformed),
        };

        if local.is_local(headers.src_addr) {
            let key = derive_endpoint_key(headers.dst_addr, headers.dst_port);
            match headers.tcp_flags() {
                Some(flags) if flags.closes_session() => self.sessions.remove(&key),
                Some(flags) if !flags.opens_session() => {}
                _ => {
                    let _ = self.sessions.insert(&key);
                }
            }
            return Decision::pass(Reason::Outgoing);
        }

        let key = derive_endpoint_key(headers.src_addr, headers.src_port);
        if self.sessions.contains(&key) {
            if headers.tcp_flags().is_some_and(|flags| flags.closes_session()) {
                self.sessions.remove(&key);
            }
            self.events.emit(&FlowEvent::new(&headers, Reason::Session));
            return Decision::pass(Reason::Session);
        }

        self.apply_policy(&headers)
    }
}
