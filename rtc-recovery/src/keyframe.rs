//! Per-SSRC key frame request coalescing, rate-limiting and retry.

use std::collections::HashMap;

use crate::timer::TimerQueue;

/// How long to wait for a requested key frame before assuming the PLI/FIR
/// was lost and re-requesting once.
pub const KEY_FRAME_RETRANSMISSION_WAIT_MS: u64 = 1000;

/// Receives the requests that actually go out to the remote peer (as PLI or
/// FIR, encoded upstream).
pub trait KeyFrameRequestManagerListener {
    fn on_key_frame_needed(&mut self, ssrc: u32);
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum KeyFrameTimerKey {
    /// A requested key frame has not arrived yet.
    RetransmissionWait(u32),
    /// Requests for this SSRC are inside the rate-limit window.
    RequestDelay(u32),
}

struct PendingKeyFrameInfo {
    retry_on_timeout: bool,
}

struct KeyFrameRequestDelayer {
    key_frame_requested: bool,
}

/// Tracks key frame requests per SSRC so that repeated requests coalesce, a
/// lost PLI/FIR is retried once, and (optionally) requests are spaced by a
/// delay window.
///
/// State per SSRC: idle → requested on need; requested → idle on reception or
/// on the post-retry timeout. With a configured delay, a need also opens the
/// throttle window; a need arriving inside the window is replayed when the
/// window closes.
pub struct KeyFrameRequestManager<L> {
    listener: L,
    key_frame_request_delay_ms: u64,
    key_frame_retransmission_wait_ms: u64,
    pending: HashMap<u32, PendingKeyFrameInfo>,
    delayers: HashMap<u32, KeyFrameRequestDelayer>,
    timers: TimerQueue<KeyFrameTimerKey>,
}

impl<L: KeyFrameRequestManagerListener> KeyFrameRequestManager<L> {
    /// `key_frame_request_delay_ms` of 0 disables rate-limiting.
    pub fn new(listener: L, key_frame_request_delay_ms: u64) -> Self {
        Self {
            listener,
            key_frame_request_delay_ms,
            key_frame_retransmission_wait_ms: KEY_FRAME_RETRANSMISSION_WAIT_MS,
            pending: HashMap::new(),
            delayers: HashMap::new(),
            timers: TimerQueue::new(),
        }
    }

    /// Override the retransmission wait.
    pub fn with_retransmission_wait(mut self, wait_ms: u64) -> Self {
        self.key_frame_retransmission_wait_ms = wait_ms;
        self
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    /// A key frame is needed for `ssrc`.
    pub fn key_frame_needed(&mut self, ssrc: u32, now_ms: u64) {
        if self.key_frame_request_delay_ms > 0 {
            if let Some(delayer) = self.delayers.get_mut(&ssrc) {
                // Inside the delay window: remember and replay on timeout.
                delayer.key_frame_requested = true;
                return;
            }

            self.delayers.insert(
                ssrc,
                KeyFrameRequestDelayer {
                    key_frame_requested: false,
                },
            );
            self.timers.schedule(
                KeyFrameTimerKey::RequestDelay(ssrc),
                now_ms + self.key_frame_request_delay_ms,
            );
        }

        if let Some(pending) = self.pending.get_mut(&ssrc) {
            // A request is already in flight; re-request if it times out.
            pending.retry_on_timeout = true;
            return;
        }

        self.pending.insert(
            ssrc,
            PendingKeyFrameInfo {
                retry_on_timeout: true,
            },
        );
        self.timers.schedule(
            KeyFrameTimerKey::RetransmissionWait(ssrc),
            now_ms + self.key_frame_retransmission_wait_ms,
        );
        self.listener.on_key_frame_needed(ssrc);
    }

    /// A key frame is needed for `ssrc`, bypassing coalescing and the delay
    /// window.
    pub fn force_key_frame_needed(&mut self, ssrc: u32, now_ms: u64) {
        if self.key_frame_request_delay_ms > 0 {
            // Cancel and replace any delayer regardless of its state.
            self.delayers.insert(
                ssrc,
                KeyFrameRequestDelayer {
                    key_frame_requested: false,
                },
            );
            self.timers.schedule(
                KeyFrameTimerKey::RequestDelay(ssrc),
                now_ms + self.key_frame_request_delay_ms,
            );
        }

        match self.pending.get_mut(&ssrc) {
            Some(pending) => {
                pending.retry_on_timeout = true;
            }
            None => {
                self.pending.insert(
                    ssrc,
                    PendingKeyFrameInfo {
                        retry_on_timeout: true,
                    },
                );
            }
        }
        self.timers.schedule(
            KeyFrameTimerKey::RetransmissionWait(ssrc),
            now_ms + self.key_frame_retransmission_wait_ms,
        );

        self.listener.on_key_frame_needed(ssrc);
    }

    /// A key frame arrived for `ssrc`; the pending request (if any) is done.
    pub fn key_frame_received(&mut self, ssrc: u32) {
        if self.pending.remove(&ssrc).is_some() {
            self.timers
                .cancel(&KeyFrameTimerKey::RetransmissionWait(ssrc));
        }
    }

    /// Earliest pending timer deadline.
    pub fn poll_timeout(&mut self) -> Option<u64> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at or before `now_ms`.
    pub fn handle_timeout(&mut self, now_ms: u64) {
        while let Some(key) = self.timers.pop_due(now_ms) {
            match key {
                KeyFrameTimerKey::RetransmissionWait(ssrc) => {
                    self.on_key_frame_request_timeout(ssrc, now_ms);
                }
                KeyFrameTimerKey::RequestDelay(ssrc) => {
                    self.on_key_frame_delay_timeout(ssrc, now_ms);
                }
            }
        }
    }

    /// Cancel every pending request and delay window.
    pub fn stop(&mut self) {
        self.pending.clear();
        self.delayers.clear();
        self.timers.clear();
    }

    fn on_key_frame_request_timeout(&mut self, ssrc: u32, now_ms: u64) {
        // The entry may have been removed since the timer was armed.
        let Some(pending) = self.pending.get_mut(&ssrc) else {
            return;
        };

        if pending.retry_on_timeout {
            // Best effort in case the PLI/FIR was lost. Do not retry again.
            pending.retry_on_timeout = false;
            self.timers.schedule(
                KeyFrameTimerKey::RetransmissionWait(ssrc),
                now_ms + self.key_frame_retransmission_wait_ms,
            );
            self.listener.on_key_frame_needed(ssrc);
        } else {
            self.pending.remove(&ssrc);
        }
    }

    fn on_key_frame_delay_timeout(&mut self, ssrc: u32, now_ms: u64) {
        let Some(delayer) = self.delayers.remove(&ssrc) else {
            return;
        };

        // Ask for a new key frame as normal if one was needed meanwhile.
        if delayer.key_frame_requested {
            self.key_frame_needed(ssrc, now_ms);
        }
    }
}
