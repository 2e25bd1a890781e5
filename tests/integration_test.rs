use ebpfw::common::{
    derive_endpoint_key, parse_frame, protocol, Dispatcher, FlowEvent, Reason, SessionKey,
    SessionTable, TcpFlags, Verdict,
};
use ebpfw::config::FirewallConfig;
use ebpfw::error::EbpfwError;
use ebpfw::host::{HostEvents, HostLedger, HostPolicy, HostSessions};
use ebpfw::policy::sync_policy;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::Receiver;

const HOST: [u8; 4] = [192, 168, 0, 28];
const PEER: [u8; 4] = [93, 184, 216, 34];
const SCANNER: [u8; 4] = [203, 0, 113, 7];

fn frame(proto: u8, src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, flags: u8) -> Vec<u8> {
    let mut buf = vec![0xaa; 12];
    buf.extend_from_slice(&0x0800u16.to_be_bytes());

    let mut ip = [0u8; 20];
    ip[0] = 0x45;
    ip[9] = proto;
    ip[12..16].copy_from_slice(&src);
    ip[16..20].copy_from_slice(&dst);
    buf.extend_from_slice(&ip);

    buf.extend_from_slice(&sport.to_be_bytes());
    buf.extend_from_slice(&dport.to_be_bytes());
    if proto == protocol::TCP {
        let mut rest = [0u8; 16];
        rest[8] = 0x50;
        rest[9] = flags;
        buf.extend_from_slice(&rest);
    } else {
        buf.extend_from_slice(&[0u8; 4]);
    }
    buf
}

fn tcp(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, flags: u8) -> Vec<u8> {
    frame(protocol::TCP, src, sport, dst, dport, flags)
}

fn udp(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16) -> Vec<u8> {
    frame(protocol::UDP, src, sport, dst, dport, 0)
}

fn addr(octets: [u8; 4]) -> u32 {
    u32::from_be_bytes(octets)
}

struct Host {
    sessions: HostSessions,
    ledger: HostLedger,
    policy: HostPolicy,
    events: HostEvents,
    rx: Receiver<FlowEvent>,
}

impl Host {
    fn new(deny: bool, ports: &[u16]) -> Self {
        let (events, rx) = HostEvents::channel(64);
        Self {
            sessions: HostSessions::default(),
            ledger: HostLedger::default(),
            policy: HostPolicy::new(deny, ports).unwrap(),
            events,
            rx,
        }
    }

    fn dispatcher(
        &self,
    ) -> Dispatcher<&HostSessions, &HostLedger, &HostPolicy, &HostEvents> {
        Dispatcher::new(&self.sessions, &self.ledger, &self.policy, &self.events)
    }

    fn drain_events(&mut self) -> Vec<FlowEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

#[test]
fn test_session_lifecycle() {
    let mut host = Host::new(true, &[]);
    let fw = host.dispatcher();

    fw.egress(&tcp(HOST, 40000, PEER, 443, TcpFlags::SYN)[..]);
    assert_eq!(host.sessions.len(), 1);

    let reply = tcp(PEER, 443, HOST, 40000, TcpFlags::SYN | TcpFlags::ACK);
    let decision = fw.ingress(&reply[..]);
    assert_eq!(decision.verdict, Verdict::Pass);
    assert_eq!(decision.reason, Reason::Session);

    fw.egress(&tcp(HOST, 40000, PEER, 443, TcpFlags::FIN | TcpFlags::ACK)[..]);
    assert!(host.sessions.is_empty());

    let late = fw.ingress(&tcp(PEER, 443, HOST, 40000, TcpFlags::ACK)[..]);
    assert_eq!(late.verdict, Verdict::Drop);
    assert_eq!(host.ledger.get(addr(PEER)).map(|e| e.count), Some(1));

    // session return traffic is not reported
    assert!(host.drain_events().is_empty());
}

#[test]
fn test_rst_ack_tears_down() {
    let host = Host::new(true, &[]);
    let fw = host.dispatcher();

    fw.egress(&tcp(HOST, 40001, PEER, 80, TcpFlags::SYN)[..]);
    fw.egress(&tcp(HOST, 40001, PEER, 80, TcpFlags::RST | TcpFlags::ACK)[..]);
    assert!(host.sessions.is_empty());
}

#[test]
fn test_return_traffic_never_touches_ledger() {
    let host = Host::new(true, &[]);
    let fw = host.dispatcher();

    fw.egress(&tcp(HOST, 40000, PEER, 22, TcpFlags::SYN)[..]);
    for _ in 0..10 {
        let decision = fw.ingress(&tcp(PEER, 22, HOST, 40000, TcpFlags::ACK)[..]);
        assert_eq!(decision.verdict, Verdict::Pass);
    }
    assert!(host.ledger.is_empty());
}

#[test]
fn test_default_allow_emits_event() {
    let mut host = Host::new(false, &[]);
    let decision = host.dispatcher().ingress(&tcp(PEER, 5555, HOST, 22, TcpFlags::SYN)[..]);
    assert_eq!(decision.verdict, Verdict::Pass);
    assert_eq!(decision.reason, Reason::DefaultAllowed);

    let events = host.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].src_addr, addr(PEER));
    assert_eq!(events[0].dst_port, 22);
    assert_eq!(events[0].protocol, protocol::TCP);
    assert_eq!(events[0].reason, Reason::DefaultAllowed as u8);
}

#[test]
fn test_allow_list_in_deny_mode() {
    let mut host = Host::new(true, &[443]);
    let fw = host.dispatcher();

    let https = fw.ingress(&tcp(PEER, 5555, HOST, 443, TcpFlags::SYN)[..]);
    assert_eq!(https.verdict, Verdict::Pass);
    assert_eq!(https.reason, Reason::PortAllowed);

    let ssh = fw.ingress(&tcp(PEER, 5555, HOST, 22, TcpFlags::SYN)[..]);
    assert_eq!(ssh.verdict, Verdict::Drop);
    assert_eq!(ssh.reason, Reason::Denied);

    let entry = host.ledger.get(addr(PEER)).unwrap();
    assert_eq!(entry.count, 1);
    assert_eq!(entry.dst_addr, addr(HOST));
    assert_eq!(host.drain_events().len(), 1);
}

#[test]
fn test_ledger_accumulates_per_source() {
    let host = Host::new(true, &[]);
    let fw = host.dispatcher();

    for port in [22, 23, 3389] {
        fw.ingress(&tcp(SCANNER, 6000, HOST, port, TcpFlags::SYN)[..]);
    }

    let entries = host.ledger.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].src_addr, addr(SCANNER));
    assert_eq!(entries[0].count, 3);
}

#[test]
fn test_udp_is_policy_only_on_tc_path() {
    let host = Host::new(true, &[]);
    let fw = host.dispatcher();

    fw.egress(&udp(HOST, 5353, PEER, 53)[..]);
    assert!(host.sessions.is_empty());
    let answer = fw.ingress(&udp(PEER, 53, HOST, 5353)[..]);
    assert_eq!(answer.verdict, Verdict::Drop);
}

#[test]
fn test_malformed_frames_pass_without_side_effects() {
    let mut host = Host::new(true, &[]);
    let fw = host.dispatcher();

    let mut arp = tcp(SCANNER, 1, HOST, 22, TcpFlags::SYN);
    arp[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
    let mut icmp = tcp(SCANNER, 1, HOST, 22, TcpFlags::SYN);
    icmp[14 + 9] = 1;
    let full = tcp(SCANNER, 1, HOST, 22, TcpFlags::SYN);
    let truncated = &full[..40];

    for frame in [&arp[..], &icmp[..], truncated] {
        let decision = fw.ingress(frame);
        assert_eq!(decision.verdict, Verdict::Pass);
        assert_eq!(decision.reason, Reason::Malformed);
    }
    assert!(host.ledger.is_empty());
    assert!(host.drain_events().is_empty());
}

#[test]
fn test_full_session_table_passes_egress() {
    let (events, _rx) = HostEvents::channel(4);
    let sessions: HostSessions = HostSessions::with_capacity(2);
    let ledger = HostLedger::default();
    let policy = HostPolicy::new(true, &[]).unwrap();
    let fw = Dispatcher::new(&sessions, &ledger, &policy, &events);

    for port in 1..=3u16 {
        let decision = fw.egress(&tcp(HOST, port, PEER, 80, TcpFlags::SYN)[..]);
        assert_eq!(decision.verdict, Verdict::Pass);
    }
    assert_eq!(sessions.len(), 2);

    // the rejected session has no passthrough
    let reply = fw.ingress(&tcp(PEER, 80, HOST, 3, TcpFlags::SYN | TcpFlags::ACK)[..]);
    assert_eq!(reply.verdict, Verdict::Drop);
}

#[test]
fn test_full_ledger_still_drops() {
    let (events, _rx) = HostEvents::channel(4);
    let sessions = HostSessions::default();
    let ledger = HostLedger::with_capacity(1);
    let policy = HostPolicy::new(true, &[]).unwrap();
    let fw = Dispatcher::new(&sessions, &ledger, &policy, &events);

    fw.ingress(&tcp(SCANNER, 1, HOST, 22, TcpFlags::SYN)[..]);
    let second = fw.ingress(&tcp(PEER, 1, HOST, 22, TcpFlags::SYN)[..]);
    assert_eq!(second.verdict, Verdict::Drop);
    assert_eq!(ledger.len(), 1);
    assert!(ledger.get(addr(PEER)).is_none());
}

#[test]
fn test_combined_path_with_host_tables() {
    let (events, mut rx) = HostEvents::channel(8);
    let outgoing: HostSessions<u64> = HostSessions::with_capacity(16);
    let ledger = HostLedger::default();
    let policy = HostPolicy::new(true, &[]).unwrap();
    let fw = Dispatcher::new(&outgoing, &ledger, &policy, &events);
    let local = [addr(HOST)];

    let query = fw.combined(&udp(HOST, 5353, PEER, 53)[..], &local[..]);
    assert_eq!(query.reason, Reason::Outgoing);
    assert!(outgoing.contains(&derive_endpoint_key(addr(PEER), 53)));

    let answer = fw.combined(&udp(PEER, 53, HOST, 5353)[..], &local[..]);
    assert_eq!(answer.verdict, Verdict::Pass);
    assert_eq!(rx.try_recv().map(|e| e.reason), Ok(Reason::Session as u8));

    let stranger = fw.combined(&udp(PEER, 54, HOST, 5353)[..], &local[..]);
    assert_eq!(stranger.verdict, Verdict::Drop);
    assert_eq!(ledger.get(addr(PEER)).map(|e| e.count), Some(1));
}

#[test]
fn test_concurrent_ingress_from_many_threads() {
    let (events, _rx) = HostEvents::channel(1);
    let sessions = Arc::new(HostSessions::default());
    let ledger = HostLedger::default();
    let policy = HostPolicy::new(true, &[]).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let (sessions, ledger, policy, events) =
                (sessions.clone(), ledger.clone(), policy.clone(), events.clone());
            thread::spawn(move || {
                let fw = Dispatcher::new(&*sessions, &ledger, &policy, &events);
                let attempt = tcp(SCANNER, 1, HOST, 22, TcpFlags::SYN);
                for _ in 0..500 {
                    assert_eq!(fw.ingress(&attempt[..]).verdict, Verdict::Drop);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(ledger.get(addr(SCANNER)).map(|e| e.count), Some(2000));
}

#[test]
fn test_policy_sync_then_dispatch() {
    let (events, _rx) = HostEvents::channel(4);
    let sessions = HostSessions::default();
    let ledger = HostLedger::default();
    let mut policy = HostPolicy::default();

    sync_policy(
        &mut policy,
        &FirewallConfig {
            default_deny: true,
            allowed_ports: vec![8443],
        },
    )
    .unwrap();

    let fw = Dispatcher::new(&sessions, &ledger, &policy, &events);
    assert_eq!(
        fw.ingress(&tcp(PEER, 1, HOST, 8443, TcpFlags::SYN)[..]).verdict,
        Verdict::Pass
    );
    assert_eq!(
        fw.ingress(&tcp(PEER, 1, HOST, 8080, TcpFlags::SYN)[..]).verdict,
        Verdict::Drop
    );
}

#[test]
fn test_reply_key_matches_request_key() {
    let request = parse_frame(&tcp(HOST, 40000, PEER, 443, TcpFlags::SYN)[..]).unwrap();
    let reply =
        parse_frame(&tcp(PEER, 443, HOST, 40000, TcpFlags::SYN | TcpFlags::ACK)[..]).unwrap();
    assert_eq!(SessionKey::egress(&request), SessionKey::ingress(&reply));

    // a different client port on the host is a different session
    let other = parse_frame(&tcp(PEER, 443, HOST, 40001, TcpFlags::ACK)[..]).unwrap();
    assert_ne!(SessionKey::egress(&request), SessionKey::ingress(&other));
}

#[test]
fn test_combined_table_drains_as_connections_close() {
    let (events, _rx) = HostEvents::channel(16);
    let outgoing: HostSessions<u64> = HostSessions::with_capacity(2);
    let ledger = HostLedger::default();
    let policy = HostPolicy::new(true, &[]).unwrap();
    let fw = Dispatcher::new(&outgoing, &ledger, &policy, &events);
    let local = [addr(HOST)];

    for peer in [[10, 0, 0, 1], [10, 0, 0, 2]] {
        fw.combined(&tcp(HOST, 40000, peer, 443, TcpFlags::SYN)[..], &local[..]);
        fw.combined(&tcp(peer, 443, HOST, 40000, TcpFlags::SYN | TcpFlags::ACK)[..], &local[..]);
        fw.combined(&tcp(HOST, 40000, peer, 443, TcpFlags::FIN | TcpFlags::ACK)[..], &local[..]);
        fw.combined(&tcp(peer, 443, HOST, 40000, TcpFlags::FIN | TcpFlags::ACK)[..], &local[..]);
        fw.combined(&tcp(HOST, 40000, peer, 443, TcpFlags::ACK)[..], &local[..]);
    }
    assert!(outgoing.is_empty());

    let third = [10, 0, 0, 3];
    fw.combined(&tcp(HOST, 40000, third, 443, TcpFlags::SYN)[..], &local[..]);
    let reply = tcp(third, 443, HOST, 40000, TcpFlags::SYN | TcpFlags::ACK);
    let reply = fw.combined(&reply[..], &local[..]);
    assert_eq!(reply.verdict, Verdict::Pass);
    assert_eq!(reply.reason, Reason::Session);
}

#[test]
fn test_error_types() {
    let err = EbpfwError::CapacityExceeded {
        table: "ALLOWED_PORTS",
        capacity: 256,
    };
    assert!(err.to_string().contains("ALLOWED_PORTS"));
    assert!(err.to_string().contains("256"));
}
