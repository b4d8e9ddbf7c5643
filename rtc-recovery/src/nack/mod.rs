//! NACK-based loss recovery (RFC 4585).
//!
//! The receive side detects missing packets by tracking sequence numbers,
//! then asks the sender to retransmit them by emitting RTCP NACK batches.
//! Retransmissions typically arrive on an RTX stream (RFC 4588) and are fed
//! back in with `is_recovered` set.
//!
//! [`NackGenerator`] keeps one ordered list of missing sequence numbers per
//! stream. A batch is emitted immediately when a gap opens (seq trigger) and
//! again from a periodic RTT-paced timer until each entry is recovered, ages
//! out, or exhausts its retries. When the loss window grows past what NACKs
//! can plausibly repair, the generator gives up on retransmission and asks
//! for a key frame instead.

mod generator;

pub use generator::{
    DEFAULT_RTT_MS, MAX_NACK_PACKETS, MAX_NACK_RETRIES, MAX_PACKET_AGE, NACK_TIMER_INTERVAL_MS,
    NackGenerator, NackListener,
};
