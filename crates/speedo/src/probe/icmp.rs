use std::future::Future;
use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use super::ProbeError;

const ECHO_REQUEST: u8 = 8;
const ECHO_REPLY: u8 = 0;
const PAYLOAD_LEN: usize = 56;
const TOOL: &str = "icmp";

fn failure(reason: String) -> ProbeError {
    ProbeError::Failure {
        tool: TOOL.to_string(),
        reason,
    }
}

/// Run `count` sequential pings through `ping`, `interval` apart, and collect
/// the RTTs (ms) of the ones that were answered. Lost or failed probes are
/// left out.
pub async fn sample_rtts<F, Fut>(count: u32, interval: Duration, mut ping: F) -> Vec<f64>
where
    F: FnMut(u16) -> Fut,
    Fut: Future<Output = Result<Duration, ProbeError>>,
{
    let mut rtts = Vec::new();

    for i in 0..count {
        let seq = i as u16;
        match ping(seq).await {
            Ok(rtt) => rtts.push(rtt.as_secs_f64() * 1000.0),
            Err(e) => tracing::debug!(seq, error = %e, "Ping probe lost"),
        }

        if i + 1 < count {
            tokio::time::sleep(interval).await;
        }
    }

    rtts
}

/// One echo round trip to `dest`.
pub async fn ping(dest: IpAddr, seq: u16, timeout: Duration) -> Result<Duration, ProbeError> {
    // Run blocking socket operations on the blocking pool to avoid stalling the runtime
    tokio::task::spawn_blocking(move || send_echo_sync(dest, seq, timeout))
        .await
        .unwrap_or_else(|e| Err(failure(e.to_string())))
}

/// Check that an ICMP socket towards `dest` can be opened at all.
pub async fn check_available(dest: IpAddr) -> Result<(), ProbeError> {
    tokio::task::spawn_blocking(move || open_socket(dest))
        .await
        .map_err(|e| failure(e.to_string()))?
        .map(|_| ())
        .map_err(|e| {
            failure(format!(
                "cannot open an ICMP socket ({e}); needs CAP_NET_RAW or a group in net.ipv4.ping_group_range"
            ))
        })
}

/// Open an ICMP socket: raw first (needs privileges), then the unprivileged
/// datagram flavour. Returns the socket and whether it is raw.
fn open_socket(dest: IpAddr) -> std::io::Result<(Socket, bool)> {
    let (domain, protocol) = match dest {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };

    match Socket::new(domain, Type::RAW, Some(protocol)) {
        Ok(s) => Ok((s, true)),
        Err(e) => {
            tracing::debug!("Failed to create raw socket: {} (trying datagram ICMP)", e);
            Socket::new(domain, Type::DGRAM, Some(protocol)).map(|s| (s, false))
        }
    }
}

fn send_echo_sync(dest: IpAddr, seq: u16, timeout: Duration) -> Result<Duration, ProbeError> {
    let (socket, raw) = open_socket(dest).map_err(|e| failure(e.to_string()))?;

    let id = std::process::id() as u16;
    let packet = echo_request(dest.is_ipv6(), id, seq);

    let send_time = Instant::now();
    let dest_addr = SocketAddr::new(dest, 0);
    socket
        .send_to(&packet, &dest_addr.into())
        .map_err(|e| failure(e.to_string()))?;

    let deadline = send_time + timeout;
    let mut buf = [0u8; 1500];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProbeError::Timeout(timeout));
        }
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| failure(e.to_string()))?;

        let n = match (&socket).read(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                return Err(ProbeError::Timeout(timeout));
            }
            Err(e) => return Err(failure(e.to_string())),
        };

        // IPv4 replies may arrive with the IP header in front (version nibble 4,
        // never a valid echo reply type). Datagram sockets get a kernel-chosen
        // identifier, so only the sequence is checked there.
        let packet = &buf[..n];
        let icmp = if dest.is_ipv4() && packet.first().is_some_and(|b| b >> 4 == 4) {
            strip_ipv4_header(packet)
        } else {
            packet
        };
        if is_echo_reply(icmp, dest.is_ipv6(), raw.then_some(id), seq) {
            return Ok(send_time.elapsed());
        }
    }
}

fn echo_request(v6: bool, id: u16, seq: u16) -> Vec<u8> {
    let mut buf = vec![0u8; 8 + PAYLOAD_LEN];
    buf[0] = if v6 { 128 } else { ECHO_REQUEST };
    buf[1] = 0; // Code: 0
    buf[4..6].copy_from_slice(&id.to_be_bytes());
    buf[6..8].copy_from_slice(&seq.to_be_bytes());
    for (i, b) in buf[8..].iter_mut().enumerate() {
        *b = i as u8;
    }

    // ICMPv6 checksums are filled in by the kernel
    if !v6 {
        let checksum = icmp_checksum(&buf);
        buf[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    buf
}

fn strip_ipv4_header(packet: &[u8]) -> &[u8] {
    let header_len = packet.first().map(|b| ((b & 0x0f) as usize) * 4).unwrap_or(0);
    packet.get(header_len..).unwrap_or(&[])
}

fn is_echo_reply(icmp: &[u8], v6: bool, id: Option<u16>, seq: u16) -> bool {
    if icmp.len() < 8 {
        return false;
    }
    let reply_type = if v6 { 129 } else { ECHO_REPLY };
    if icmp[0] != reply_type {
        return false;
    }
    if let Some(id) = id {
        if u16::from_be_bytes([icmp[4], icmp[5]]) != id {
            return false;
        }
    }
    u16::from_be_bytes([icmp[6], icmp[7]]) == seq
}

fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u16::from_be_bytes([pair[0], pair[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn lost_pings_are_left_out() {
        let ms = Duration::from_millis;
        let mut script = VecDeque::from([
            Ok(ms(10)),
            Err(ProbeError::Timeout(ms(500))),
            Ok(ms(14)),
            Err(failure("network unreachable".into())),
            Ok(ms(18)),
        ]);
        let mut seqs = Vec::new();
        let started = tokio::time::Instant::now();

        let rtts = sample_rtts(5, ms(200), |seq| {
            seqs.push(seq);
            std::future::ready(script.pop_front().unwrap())
        })
        .await;

        assert_eq!(rtts, [10.0, 14.0, 18.0]);
        assert_eq!(seqs, [0, 1, 2, 3, 4]);
        // Four gaps between five pings.
        assert_eq!(started.elapsed(), ms(800));
        assert!((crate::probe::jitter_ms(&rtts) - 4.0).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn all_pings_lost_gives_no_rtts() {
        let rtts = sample_rtts(3, Duration::from_millis(200), |_| {
            std::future::ready(Err(ProbeError::Timeout(Duration::from_millis(500))))
        })
        .await;
        assert!(rtts.is_empty());
    }

    #[tokio::test]
    async fn socket_check_reports_icmp_failure() {
        // Outcome depends on host privileges; a failure must name the tool and the fix.
        match check_available("127.0.0.1".parse().unwrap()).await {
            Ok(()) => {}
            Err(ProbeError::Failure { tool, reason }) => {
                assert_eq!(tool, "icmp");
                assert!(reason.contains("CAP_NET_RAW"));
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn checksum_of_packet_with_checksum_is_zero() {
        let packet = echo_request(false, 0x1234, 7);
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn checksum_handles_odd_length() {
        assert_eq!(icmp_checksum(&[0x01]), !0x0100);
    }

    #[test]
    fn request_layout() {
        let packet = echo_request(false, 0xbeef, 3);
        assert_eq!(packet.len(), 8 + PAYLOAD_LEN);
        assert_eq!(packet[0], ECHO_REQUEST);
        assert_eq!(&packet[4..6], &[0xbe, 0xef]);
        assert_eq!(&packet[6..8], &[0, 3]);
    }

    #[test]
    fn matches_reply_behind_ip_header() {
        let mut reply = echo_request(false, 0xbeef, 3);
        reply[0] = ECHO_REPLY;
        let mut packet = vec![0x45u8];
        packet.extend_from_slice(&[0u8; 19]);
        packet.extend_from_slice(&reply);

        let icmp = strip_ipv4_header(&packet);
        assert!(is_echo_reply(icmp, false, Some(0xbeef), 3));
        assert!(!is_echo_reply(icmp, false, Some(0xbeef), 4));
        assert!(!is_echo_reply(icmp, false, Some(0x0001), 3));
        // Datagram sockets get a kernel-chosen identifier.
        assert!(is_echo_reply(icmp, false, None, 3));
    }

    #[test]
    fn ignores_non_reply_messages() {
        let request = echo_request(false, 1, 1);
        assert!(!is_echo_reply(&request, false, Some(1), 1));
        assert!(!is_echo_reply(&[0, 0, 0], false, None, 0));
    }
}
