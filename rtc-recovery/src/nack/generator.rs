use log::{debug, warn};

use crate::packet::RtpPacketInfo;
use crate::sequence::{SeqSet, is_seq_higher_than, is_seq_lower_than};

/// Entries further than this behind the frontier are no longer worth
/// recovering and age out of every list.
pub const MAX_PACKET_AGE: u16 = 10000;
/// Hard cap on the NACK list; overflowing it escalates to a key frame.
pub const MAX_NACK_PACKETS: usize = 1000;
/// RTT assumed until the owner reports a measured one.
pub const DEFAULT_RTT_MS: u32 = 100;
/// A sequence number is NACKed at most this many times.
pub const MAX_NACK_RETRIES: u8 = 10;
/// Periodic timer pacing time-filter batches.
pub const NACK_TIMER_INTERVAL_MS: u64 = 40;

/// Receives the feedback the generator produces.
///
/// Callbacks are invoked synchronously from `receive_packet()` /
/// `handle_timeout()`, after the generator has finished mutating its own
/// state, so a listener may re-enter the kernel (e.g. forward
/// `on_key_frame_required` into a `KeyFrameRequestManager` it holds).
pub trait NackListener {
    /// A batch of missing sequence numbers, in wrap-aware ascending order,
    /// ready to be encoded as RTCP NACK feedback.
    fn on_nack_required(&mut self, seqs: &[u16]);
    /// Retransmission is no longer viable; a key frame must be requested.
    fn on_key_frame_required(&mut self);
}

struct NackInfo {
    created_at_ms: u64,
    sent_at_ms: u64,
    seq: u16,
    /// Earliest frontier that releases this entry for seq-filter sending.
    /// Equal to `seq` at creation, which makes every never-sent entry
    /// eligible on the next gap; kept for future pacing policies.
    send_at_seq: u16,
    retries: u8,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum NackFilter {
    /// Entries never sent whose release frontier has been reached.
    Seq,
    /// Entries never sent, or sent at least an RTT ago.
    Time,
}

/// Per-stream loss tracker feeding NACK batches to a [`NackListener`].
///
/// Feed every incoming packet of the stream to
/// [`receive_packet`](NackGenerator::receive_packet) (retransmitted ones with
/// `is_recovered` set) and drive the pacing timer through
/// [`poll_timeout`](NackGenerator::poll_timeout) /
/// [`handle_timeout`](NackGenerator::handle_timeout).
pub struct NackGenerator<L> {
    listener: L,
    send_nack_delay_ms: u64,
    rtt_ms: u32,
    started: bool,
    last_seq: u16,
    /// Missing sequence numbers in wrap-aware ascending order, all strictly
    /// behind `last_seq`.
    nack_list: Vec<NackInfo>,
    key_frame_list: SeqSet<u16>,
    recovered_list: SeqSet<u16>,
    timer_deadline_ms: Option<u64>,
}

impl<L: NackListener> NackGenerator<L> {
    /// `send_nack_delay_ms` is the minimum age before a gap is eligible to
    /// be NACKed (0 = immediately).
    pub fn new(listener: L, send_nack_delay_ms: u64) -> Self {
        Self {
            listener,
            send_nack_delay_ms,
            rtt_ms: DEFAULT_RTT_MS,
            started: false,
            last_seq: 0,
            nack_list: Vec::new(),
            key_frame_list: SeqSet::new(u16::MAX),
            recovered_list: SeqSet::new(u16::MAX),
            timer_deadline_ms: None,
        }
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    /// Feed a measured round-trip time; paces the time-filter resends.
    pub fn update_rtt(&mut self, rtt_ms: u32) {
        self.rtt_ms = rtt_ms;
    }

    /// Number of sequence numbers currently considered missing.
    pub fn nack_list_len(&self) -> usize {
        self.nack_list.len()
    }

    /// Process an incoming packet of this stream.
    ///
    /// Returns `true` iff the packet fills a gap that was NACKed at least
    /// once (i.e. it is a retransmission this generator asked for).
    pub fn receive_packet(
        &mut self,
        packet: &RtpPacketInfo,
        is_recovered: bool,
        now_ms: u64,
    ) -> bool {
        let seq = packet.sequence_number;
        let is_key_frame = packet.is_key_frame;

        if !self.started {
            self.started = true;
            self.last_seq = seq;

            if is_key_frame {
                self.key_frame_list.insert(seq);
            }

            return false;
        }

        // Obviously never NACKed.
        if seq == self.last_seq {
            return false;
        }

        // An out of order packet, or a retransmitted packet (maybe one this
        // generator no longer cares about).
        if is_seq_lower_than(seq, self.last_seq) {
            if let Some(idx) = self.nack_list.iter().position(|info| info.seq == seq) {
                debug!(
                    "NACKed packet received [ssrc:{}, seq:{}, recovered:{}]",
                    packet.ssrc, seq, is_recovered
                );

                let info = self.nack_list.remove(idx);
                return info.retries != 0;
            }

            if !is_recovered {
                warn!(
                    "ignoring older packet not present in the NACK list [ssrc:{}, seq:{}]",
                    packet.ssrc, seq
                );
            }

            return false;
        }

        // seq is newer than the latest seen, so packets may have been lost.
        if is_key_frame {
            self.key_frame_list.insert(seq);
        }

        self.key_frame_list
            .delete_lower_than(seq.wrapping_sub(MAX_PACKET_AGE));

        if is_recovered {
            self.recovered_list.insert(seq);

            // Remove old ones so recovered packets don't accumulate.
            self.recovered_list
                .delete_lower_than(seq.wrapping_sub(MAX_PACKET_AGE));

            // A packet that is newer than the last seen seq but came via RTX
            // does not advance the frontier.
            return false;
        }

        self.add_packets_to_nack_list(self.last_seq.wrapping_add(1), seq, now_ms);
        self.last_seq = seq;

        // Some entries may have been waiting for this seq number.
        let batch = self.get_nack_batch(NackFilter::Seq, now_ms);
        if !batch.is_empty() {
            self.listener.on_nack_required(&batch);
        }

        // Only arm the timer when idle; restarting a running timer here
        // would keep pushing the time-filter resends into the future.
        if self.timer_deadline_ms.is_none() {
            self.may_run_timer(now_ms);
        }

        false
    }

    /// Deadline of the pacing timer, if armed.
    pub fn poll_timeout(&self) -> Option<u64> {
        self.timer_deadline_ms
    }

    /// Fire the pacing timer if due: emit a time-filter batch and re-arm
    /// while entries remain.
    pub fn handle_timeout(&mut self, now_ms: u64) {
        let Some(deadline_ms) = self.timer_deadline_ms else {
            return;
        };
        if now_ms < deadline_ms {
            return;
        }
        self.timer_deadline_ms = None;

        let batch = self.get_nack_batch(NackFilter::Time, now_ms);
        if !batch.is_empty() {
            self.listener.on_nack_required(&batch);
        }

        self.may_run_timer(now_ms);
    }

    /// Forget all tracked state; the next packet starts a new epoch.
    pub fn reset(&mut self) {
        self.nack_list.clear();
        self.key_frame_list.clear();
        self.recovered_list.clear();
        self.started = false;
        self.last_seq = 0;
    }

    fn add_packets_to_nack_list(&mut self, seq_start: u16, seq_end: u16, now_ms: u64) {
        // Age out entries that fell too far behind.
        let age_bound = seq_end.wrapping_sub(MAX_PACKET_AGE);
        let aged = self
            .nack_list
            .iter()
            .take_while(|info| is_seq_lower_than(info.seq, age_bound))
            .count();
        self.nack_list.drain(..aged);

        // If the NACK list would grow too large, drop entries up to the
        // first packet of a key frame, key frame by key frame. If it is
        // still too large, clear it and request a key frame instead.
        let num_new_nacks = seq_end.wrapping_sub(seq_start) as usize;

        if self.nack_list.len() + num_new_nacks > MAX_NACK_PACKETS {
            while self.remove_nack_items_until_key_frame()
                && self.nack_list.len() + num_new_nacks > MAX_NACK_PACKETS
            {}

            if self.nack_list.len() + num_new_nacks > MAX_NACK_PACKETS {
                warn!(
                    "NACK list full, clearing it and requesting a key frame [seq_end:{seq_end}]"
                );

                self.nack_list.clear();
                self.listener.on_key_frame_required();
                return;
            }
        }

        let mut seq = seq_start;
        while seq != seq_end {
            // No NACK for packets already recovered via RTX.
            if !self.recovered_list.contains(seq) {
                self.nack_list.push(NackInfo {
                    created_at_ms: now_ms,
                    sent_at_ms: 0,
                    seq,
                    send_at_seq: seq,
                    retries: 0,
                });
            }
            seq = seq.wrapping_add(1);
        }
    }

    /// Drop NACK entries older than the oldest useful key frame. Returns
    /// whether any entry was removed.
    fn remove_nack_items_until_key_frame(&mut self) -> bool {
        while let Some(first_key_frame_seq) = self.key_frame_list.first() {
            let released = self
                .nack_list
                .iter()
                .take_while(|info| is_seq_lower_than(info.seq, first_key_frame_seq))
                .count();
            if released > 0 {
                self.nack_list.drain(..released);
                return true;
            }

            // This key frame is too old to release anything; try the next.
            self.key_frame_list.remove(first_key_frame_seq);
        }

        false
    }

    fn get_nack_batch(&mut self, filter: NackFilter, now_ms: u64) -> Vec<u16> {
        let last_seq = self.last_seq;
        let send_nack_delay_ms = self.send_nack_delay_ms;
        let rtt_ms = self.rtt_ms as u64;
        let mut batch = Vec::new();

        let mut idx = 0;
        while idx < self.nack_list.len() {
            let info = &mut self.nack_list[idx];

            if send_nack_delay_ms > 0
                && now_ms.saturating_sub(info.created_at_ms) < send_nack_delay_ms
            {
                idx += 1;
                continue;
            }

            let due = match filter {
                NackFilter::Seq => {
                    info.sent_at_ms == 0
                        && (info.send_at_seq == last_seq
                            || is_seq_higher_than(last_seq, info.send_at_seq))
                }
                NackFilter::Time => {
                    info.sent_at_ms == 0 || now_ms.saturating_sub(info.sent_at_ms) >= rtt_ms
                }
            };

            if !due {
                idx += 1;
                continue;
            }

            batch.push(info.seq);
            info.retries += 1;
            info.sent_at_ms = now_ms;

            if info.retries >= MAX_NACK_RETRIES {
                debug!(
                    "seq removed from the NACK list due to too many retries [seq:{}]",
                    info.seq
                );
                self.nack_list.remove(idx);
            } else {
                idx += 1;
            }
        }

        batch
    }

    fn may_run_timer(&mut self, now_ms: u64) {
        if self.nack_list.is_empty() {
            self.timer_deadline_ms = None;
        } else {
            self.timer_deadline_ms = Some(now_ms + NACK_TIMER_INTERVAL_MS);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SSRC: u32 = 0x5b6bcab5;

    // The kernel is driven with wall-clock milliseconds; `sent_at_ms == 0`
    // means "never sent", so tests start from a realistic base time.
    const BASE_MS: u64 = 1_000_000;

    #[derive(Default)]
    struct TestListener {
        nack_batches: Vec<Vec<u16>>,
        key_frame_required_count: usize,
    }

    impl NackListener for TestListener {
        fn on_nack_required(&mut self, seqs: &[u16]) {
            self.nack_batches.push(seqs.to_vec());
        }

        fn on_key_frame_required(&mut self) {
            self.key_frame_required_count += 1;
        }
    }

    fn packet(seq: u16, is_key_frame: bool) -> RtpPacketInfo {
        RtpPacketInfo {
            ssrc: TEST_SSRC,
            sequence_number: seq,
            payload_size: 1100,
            is_key_frame,
        }
    }

    // (seq, is_key_frame, first_nacked, num_nacked, key_frame_required, nack_list_size)
    type Row = (u16, bool, u16, usize, bool, usize);

    fn validate(rows: &[Row]) {
        let mut generator = NackGenerator::new(TestListener::default(), 0);

        for &(seq, is_key_frame, first_nacked, num_nacked, key_frame_required, size) in rows {
            let batches_before = generator.listener().nack_batches.len();
            let key_frames_before = generator.listener().key_frame_required_count;

            generator.receive_packet(&packet(seq, is_key_frame), false, BASE_MS);

            let listener = generator.listener();
            if num_nacked > 0 {
                assert_eq!(
                    listener.nack_batches.len(),
                    batches_before + 1,
                    "expected a NACK batch for seq {seq}"
                );
                let batch = listener.nack_batches.last().unwrap();
                assert_eq!(batch[0], first_nacked, "first NACKed seq for input {seq}");
                assert_eq!(batch.len(), num_nacked, "batch size for input {seq}");
            } else {
                assert_eq!(
                    listener.nack_batches.len(),
                    batches_before,
                    "unexpected NACK batch for seq {seq}"
                );
            }

            let expected_key_frames = key_frames_before + usize::from(key_frame_required);
            assert_eq!(
                listener.key_frame_required_count, expected_key_frames,
                "key frame escalation for seq {seq}"
            );
            assert_eq!(generator.nack_list_len(), size, "NACK list size after {seq}");
        }
    }

    #[test]
    fn test_no_nacks_required() {
        let rows: &[Row] = &[
            (2371, false, 0, 0, false, 0),
            (2372, false, 0, 0, false, 0),
            (2373, false, 0, 0, false, 0),
            (2374, false, 0, 0, false, 0),
            (2375, false, 0, 0, false, 0),
            (2376, false, 0, 0, false, 0),
            (2377, false, 0, 0, false, 0),
            (2378, false, 0, 0, false, 0),
            (2379, false, 0, 0, false, 0),
            (2380, false, 0, 0, false, 0),
            (2254, false, 0, 0, false, 0),
            (2250, false, 0, 0, false, 0),
        ];
        validate(rows);
    }

    #[test]
    fn test_nack_for_missing_ordered_packet() {
        let rows: &[Row] = &[
            (2381, false, 0, 0, false, 0),
            (2383, false, 2382, 1, false, 1),
        ];
        validate(rows);
    }

    #[test]
    fn test_sequence_wrap_generates_no_nack() {
        let rows: &[Row] = &[
            (65534, false, 0, 0, false, 0),
            (65535, false, 0, 0, false, 0),
            (0, false, 0, 0, false, 0),
        ];
        validate(rows);
    }

    #[test]
    fn test_nack_after_sequence_wrap() {
        let rows: &[Row] = &[
            (65534, false, 0, 0, false, 0),
            (65535, false, 0, 0, false, 0),
            (1, false, 0, 1, false, 1),
        ];
        validate(rows);
    }

    #[test]
    fn test_nack_after_sequence_wrap_and_yet_another_nack() {
        let rows: &[Row] = &[
            (65534, false, 0, 0, false, 0),
            (65535, false, 0, 0, false, 0),
            (1, false, 0, 1, false, 1),
            (11, false, 2, 9, false, 10),
            (12, true, 0, 0, false, 10),
            (13, true, 0, 0, false, 10),
        ];
        validate(rows);
    }

    #[test]
    fn test_intercalated_missing_packets() {
        let rows: &[Row] = &[
            (1, false, 0, 0, false, 0),
            (3, false, 2, 1, false, 1),
            (5, false, 4, 1, false, 2),
            (7, false, 6, 1, false, 3),
            (9, false, 8, 1, false, 4),
        ];
        validate(rows);
    }

    #[test]
    fn test_non_contiguous_intercalated_missing_packets() {
        let rows: &[Row] = &[
            (1, false, 0, 0, false, 0),
            (3, false, 2, 1, false, 1),
            (7, false, 4, 3, false, 4),
            (9, false, 8, 1, false, 5),
        ];
        validate(rows);
    }

    #[test]
    fn test_big_jump() {
        let rows: &[Row] = &[
            (1, false, 0, 0, false, 0),
            (300, false, 2, 298, false, 298),
            (3, false, 0, 0, false, 297),
            (4, false, 0, 0, false, 296),
            (5, false, 0, 0, false, 295),
        ];
        validate(rows);
    }

    #[test]
    fn test_key_frame_required_when_nack_list_too_large() {
        let rows: &[Row] = &[
            (1, false, 0, 0, false, 0),
            (3000, false, 0, 0, true, 0),
        ];
        validate(rows);
    }

    #[test]
    fn test_recovered_packet_does_not_advance_frontier() {
        let mut generator = NackGenerator::new(TestListener::default(), 0);

        generator.receive_packet(&packet(100, false), false, BASE_MS);
        // 102 recovered via RTX ahead of the frontier: no gap is recorded.
        assert!(!generator.receive_packet(&packet(102, false), true, BASE_MS));
        assert_eq!(generator.nack_list_len(), 0);
        assert!(generator.listener().nack_batches.is_empty());

        // The regular stream then jumps to 103: 101 is missing but 102 was
        // already recovered.
        generator.receive_packet(&packet(103, false), false, BASE_MS);
        assert_eq!(generator.nack_list_len(), 1);
        assert_eq!(generator.listener().nack_batches.last().unwrap(), &[101]);
    }

    #[test]
    fn test_nacked_retransmission_reports_found() {
        let mut generator = NackGenerator::new(TestListener::default(), 0);

        generator.receive_packet(&packet(2381, false), false, BASE_MS);
        generator.receive_packet(&packet(2383, false), false, BASE_MS);
        assert_eq!(generator.nack_list_len(), 1);

        // The retransmission of the NACKed packet arrives.
        assert!(generator.receive_packet(&packet(2382, false), true, BASE_MS + 30));
        assert_eq!(generator.nack_list_len(), 0);

        // A second copy is no longer in the list.
        assert!(!generator.receive_packet(&packet(2382, false), true, BASE_MS + 35));
    }

    #[test]
    fn test_timer_paces_resends_by_rtt() {
        let mut generator = NackGenerator::new(TestListener::default(), 0);

        generator.receive_packet(&packet(1, false), false, BASE_MS);
        generator.receive_packet(&packet(3, false), false, BASE_MS);
        assert_eq!(generator.listener().nack_batches.len(), 1);
        let deadline = generator.poll_timeout().unwrap();
        assert_eq!(deadline, BASE_MS + NACK_TIMER_INTERVAL_MS);

        // First tick: entry was sent 40 ms ago, less than the RTT.
        generator.handle_timeout(deadline);
        assert_eq!(generator.listener().nack_batches.len(), 1);

        // Ticks keep coming while the list is non-empty; once a full RTT has
        // elapsed since the send, the entry is NACKed again.
        let deadline = generator.poll_timeout().unwrap();
        generator.handle_timeout(deadline);
        let deadline = generator.poll_timeout().unwrap();
        generator.handle_timeout(deadline);
        assert_eq!(generator.listener().nack_batches.len(), 2);
        assert_eq!(generator.listener().nack_batches.last().unwrap(), &[2]);
    }

    #[test]
    fn test_entry_evicted_after_max_retries() {
        let mut generator = NackGenerator::new(TestListener::default(), 0);

        generator.receive_packet(&packet(1, false), false, BASE_MS);
        generator.receive_packet(&packet(3, false), false, BASE_MS);

        // One seq-filter send plus time-filter resends every RTT.
        let mut now_ms = BASE_MS;
        let mut guard = 0;
        while generator.nack_list_len() > 0 {
            now_ms += u64::from(DEFAULT_RTT_MS);
            generator.handle_timeout(now_ms);
            guard += 1;
            assert!(guard < 100, "entry never evicted");
        }

        let total_sends: usize = generator
            .listener()
            .nack_batches
            .iter()
            .map(|batch| batch.len())
            .sum();
        assert_eq!(total_sends, usize::from(MAX_NACK_RETRIES));

        // With nothing left the timer disarms.
        assert_eq!(generator.poll_timeout(), None);
    }

    #[test]
    fn test_send_nack_delay_gates_young_entries() {
        let mut generator = NackGenerator::new(TestListener::default(), 20);

        generator.receive_packet(&packet(1, false), false, BASE_MS);
        generator.receive_packet(&packet(3, false), false, BASE_MS);

        // The gap is younger than the configured delay: no batch yet.
        assert!(generator.listener().nack_batches.is_empty());
        assert_eq!(generator.nack_list_len(), 1);

        // The timer picks the entry up once it is old enough.
        generator.handle_timeout(BASE_MS + 40);
        assert_eq!(generator.listener().nack_batches.len(), 1);
        assert_eq!(generator.listener().nack_batches[0], vec![2]);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut generator = NackGenerator::new(TestListener::default(), 0);

        generator.receive_packet(&packet(1, true), false, BASE_MS);
        generator.receive_packet(&packet(3, false), false, BASE_MS);
        assert_eq!(generator.nack_list_len(), 1);

        generator.reset();
        assert_eq!(generator.nack_list_len(), 0);

        // The next packet starts a new epoch; no gap against the old one.
        generator.receive_packet(&packet(5000, false), false, BASE_MS);
        assert_eq!(generator.nack_list_len(), 0);
        assert_eq!(generator.listener().nack_batches.len(), 1);
    }
}
