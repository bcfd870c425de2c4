//! `check` utility: per-PID continuity/scrambling counters over a raw
//! 188-byte MPEG transport stream. Pure byte parsing — no codec library
//! needed, so it lives here rather than in `nimoch-media`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Read};

const TS_PACKET_SIZE: usize = 188;
const TS_SYNC_BYTE: u8 = 0x47;
const TS_PID_COUNT: usize = 0x2000;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct PidInfo {
    pub total: u64,
    pub dropped: u64,
    pub scrambled: u64,
}

/// Scan `input` packet-by-packet and return per-PID counters, keyed by
/// lowercase hex PID, for every PID that appeared at least once.
pub fn check_stream<R: Read>(input: &mut R) -> io::Result<BTreeMap<String, PidInfo>> {
    let mut counters = vec![PidInfo::default(); TS_PID_COUNT];
    // next expected continuity counter per PID; 0 means "not seen yet",
    // matching the original's sentinel (the first payload-bearing packet for
    // a PID is never flagged as dropped).
    let mut next_counter = vec![0u8; TS_PID_COUNT];

    let mut packet = [0u8; TS_PACKET_SIZE];
    loop {
        let mut total = 0;
        while total < TS_PACKET_SIZE {
            let n = input.read(&mut packet[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        if total == 0 {
            break;
        }
        if total < TS_PACKET_SIZE {
            break;
        }
        if packet[0] != TS_SYNC_BYTE {
            continue;
        }

        let pid = (((packet[1] as usize) & 0x1f) << 8) | packet[2] as usize;
        let info = &mut counters[pid];
        info.total += 1;

        if packet[3] & 0x10 != 0 {
            let continuity_counter = packet[3] & 0x0f;
            let expected = next_counter[pid];
            if expected != 0 && (expected & 0x0f) != continuity_counter {
                info.dropped += 1;
            }
            next_counter[pid] = continuity_counter.wrapping_add(1);
        }

        if packet[3] & 0xc0 != 0 {
            info.scrambled += 1;
        }
    }

    Ok(counters
        .into_iter()
        .enumerate()
        .filter(|(_, info)| info.total > 0)
        .map(|(pid, info)| (format!("{pid:x}"), info))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn packet(pid: u16, has_payload: bool, cc: u8, scrambled: bool) -> [u8; TS_PACKET_SIZE] {
        let mut p = [0u8; TS_PACKET_SIZE];
        p[0] = TS_SYNC_BYTE;
        p[1] = ((pid >> 8) & 0x1f) as u8;
        p[2] = (pid & 0xff) as u8;
        p[3] = (cc & 0x0f) | if has_payload { 0x10 } else { 0 } | if scrambled { 0xc0 } else { 0 };
        p
    }

    #[test]
    fn first_payload_packet_for_a_pid_never_counts_as_dropped() {
        let data = packet(0x100, true, 5, false);
        let mut cursor = Cursor::new(data.to_vec());
        let result = check_stream(&mut cursor).unwrap();
        let info = &result["100"];
        assert_eq!(info.total, 1);
        assert_eq!(info.dropped, 0);
    }

    #[test]
    fn continuity_gap_counts_as_dropped() {
        let mut data = packet(0x100, true, 0, false).to_vec();
        data.extend_from_slice(&packet(0x100, true, 2, false));
        let mut cursor = Cursor::new(data);
        let result = check_stream(&mut cursor).unwrap();
        assert_eq!(result["100"].dropped, 1);
    }

    #[test]
    fn non_sync_packets_are_skipped() {
        let mut data = vec![0u8; TS_PACKET_SIZE];
        data.extend_from_slice(&packet(0x200, true, 0, false));
        let mut cursor = Cursor::new(data);
        let result = check_stream(&mut cursor).unwrap();
        assert!(!result.contains_key("0"));
        assert_eq!(result["200"].total, 1);
    }

    #[test]
    fn scrambled_bit_is_counted() {
        let data = packet(0x10, true, 0, true);
        let mut cursor = Cursor::new(data.to_vec());
        let result = check_stream(&mut cursor).unwrap();
        assert_eq!(result["10"].scrambled, 1);
    }

    #[test]
    fn pids_never_seen_are_absent_from_output() {
        let data = packet(0x10, true, 0, false);
        let mut cursor = Cursor::new(data.to_vec());
        let result = check_stream(&mut cursor).unwrap();
        assert_eq!(result.len(), 1);
    }
}
