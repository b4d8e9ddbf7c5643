//! Receive-side RTP loss-recovery and pacing kernel for an SFU-style media
//! router.
//!
//! This crate implements the per-stream algorithmic layer that sits between a
//! transport's RTP demuxer and its RTCP feedback encoder:
//!
//! - [`NackGenerator`]: tracks gaps in the incoming sequence-number space and
//!   schedules NACK feedback batches, escalating to a key frame request when
//!   the loss window overflows.
//! - [`KeyFrameRequestManager`]: coalesces key frame requests per SSRC,
//!   rate-limits them and retries once when the PLI/FIR appears to be lost.
//! - [`SeqManager`]: remaps input sequence numbers to a hole-free output
//!   sequence across resyncs and dropped packets on the egress path.
//! - [`RateCalculator`] / [`RtpDataCounter`]: sliding-window bitrate over a
//!   ring of sub-interval buckets.
//! - [`TrendCalculator`]: monotonic-on-increase, time-decaying-on-decrease
//!   smoothing for bandwidth estimates.
//!
//! # Sans-IO
//!
//! The kernel performs no I/O and owns no clock. Callers deliver parsed
//! packet attributes ([`RtpPacketInfo`]) together with a millisecond
//! timestamp, and drive timers through `poll_timeout()` /
//! `handle_timeout(now_ms)` on the owning task. Listener callbacks
//! ([`NackListener`], [`KeyFrameRequestManagerListener`]) are invoked
//! synchronously, after internal state has been updated, so a listener may
//! re-enter the kernel (e.g. a NACK overflow feeding a
//! `KeyFrameRequestManager` held by the listener).
//!
//! Wire formats are out of scope: the kernel consumes already-parsed packet
//! attributes and emits plain sequence-number lists and SSRCs for an upstream
//! RTCP encoder.

#![warn(rust_2018_idioms)]

mod error;
mod keyframe;
mod nack;
mod packet;
mod rate;
mod seq_manager;
mod sequence;
mod timer;
mod trend;

pub use error::{Error, Result};
pub use keyframe::{
    KEY_FRAME_RETRANSMISSION_WAIT_MS, KeyFrameRequestManager, KeyFrameRequestManagerListener,
};
pub use nack::{
    DEFAULT_RTT_MS, MAX_NACK_PACKETS, MAX_NACK_RETRIES, MAX_PACKET_AGE, NACK_TIMER_INTERVAL_MS,
    NackGenerator, NackListener,
};
pub use packet::RtpPacketInfo;
pub use rate::{RateCalculator, RtpDataCounter};
pub use seq_manager::SeqManager;
pub use sequence::{SeqUnsigned, is_seq_higher_than, is_seq_lower_than};
pub use trend::TrendCalculator;
