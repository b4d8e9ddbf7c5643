//! Sliding-window byte/packet rate tracking.

use crate::error::{Error, Result};
use crate::packet::RtpPacketInfo;

const DEFAULT_SCALE: f64 = 8000.0;
const DEFAULT_WINDOW_ITEMS: usize = 100;

#[derive(Default, Clone, Copy, Debug)]
struct BufferItem {
    /// Accumulated count for this sub-interval.
    count: u64,
    /// Time the item was opened (caller's clock, ms).
    time: u64,
}

/// Rate over a sliding window of `window_size_ms`, partitioned into
/// `window_items` equal sub-intervals kept in a ring buffer.
///
/// `scale` is the multiplier applied to the windowed count; with byte counts,
/// a millisecond window and the default scale of 8000 the result of
/// [`get_rate`](RateCalculator::get_rate) is bits per second.
#[derive(Debug)]
pub struct RateCalculator {
    window_size_ms: u64,
    scale: f64,
    window_items: usize,
    item_size_ms: u64,
    buffer: Vec<BufferItem>,
    newest_item_start_time: u64,
    newest_item_index: Option<usize>,
    oldest_item_start_time: u64,
    oldest_item_index: Option<usize>,
    total_count: u64,
    bytes: u64,
    last_rate: u32,
    last_time: Option<u64>,
}

impl RateCalculator {
    /// Calculator with the default geometry (scale 8000, 100 items).
    pub fn new(window_size_ms: u64) -> Self {
        Self::build(window_size_ms.max(1), DEFAULT_SCALE, DEFAULT_WINDOW_ITEMS)
    }

    /// Calculator with explicit window geometry.
    pub fn with_geometry(window_size_ms: u64, scale: f64, window_items: usize) -> Result<Self> {
        if window_size_ms == 0 || window_items == 0 {
            return Err(Error::InvalidRateWindow);
        }
        Ok(Self::build(window_size_ms, scale, window_items))
    }

    fn build(window_size_ms: u64, scale: f64, window_items: usize) -> Self {
        let item_size_ms = (window_size_ms / window_items as u64).max(1);

        Self {
            window_size_ms,
            scale,
            window_items,
            item_size_ms,
            buffer: vec![BufferItem::default(); window_items],
            newest_item_start_time: 0,
            newest_item_index: None,
            oldest_item_start_time: 0,
            oldest_item_index: None,
            total_count: 0,
            bytes: 0,
            last_rate: 0,
            last_time: None,
        }
    }

    /// Account `size` bytes at `now_ms`.
    pub fn update(&mut self, size: u64, now_ms: u64) {
        // Ignore data older than the window start. Should never happen.
        if now_ms < self.oldest_item_start_time {
            return;
        }

        self.bytes += size;

        self.remove_old_data(now_ms);

        // Open a new item once the elapsed time from the newest item start
        // reaches the item size; otherwise merge into the newest item.
        match self.newest_item_index {
            Some(index)
                if now_ms.saturating_sub(self.newest_item_start_time) < self.item_size_ms =>
            {
                self.buffer[index].count += size;
            }
            newest => {
                let index = match newest {
                    Some(index) if index + 1 < self.window_items => index + 1,
                    _ => 0,
                };

                if Some(index) == self.oldest_item_index {
                    panic!("newest rate item index overlaps with the oldest one");
                }

                self.newest_item_index = Some(index);
                self.newest_item_start_time = now_ms;
                self.buffer[index] = BufferItem {
                    count: size,
                    time: now_ms,
                };
            }
        }

        if self.oldest_item_index.is_none() {
            self.oldest_item_index = self.newest_item_index;
            self.oldest_item_start_time = now_ms;
        }

        self.total_count += size;

        // Drop the memoised rate so a get_rate() at this same time recomputes.
        self.last_rate = 0;
        self.last_time = None;
    }

    /// Rate over the window ending at `now_ms`, scaled by `scale`.
    pub fn get_rate(&mut self, now_ms: u64) -> u32 {
        if self.last_time == Some(now_ms) {
            return self.last_rate;
        }

        self.remove_old_data(now_ms);

        let scale = self.scale / self.window_size_ms as f64;

        self.last_time = Some(now_ms);
        self.last_rate = (self.total_count as f64 * scale + 0.5) as u32;

        self.last_rate
    }

    /// Total bytes accounted over the calculator's lifetime.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    fn remove_old_data(&mut self, now_ms: u64) {
        let (Some(_), Some(mut oldest_index)) = (self.newest_item_index, self.oldest_item_index)
        else {
            return;
        };

        // Window start before the epoch of the caller's clock: nothing can
        // be old yet.
        let Some(new_oldest_time) = now_ms.checked_sub(self.window_size_ms) else {
            return;
        };

        // Oldest item already removed.
        if new_oldest_time < self.oldest_item_start_time {
            return;
        }

        // A whole window has elapsed since the last entry. Reset.
        if new_oldest_time >= self.newest_item_start_time {
            self.reset();
            return;
        }

        while new_oldest_time >= self.oldest_item_start_time {
            let oldest_item = &mut self.buffer[oldest_index];
            self.total_count -= oldest_item.count;
            *oldest_item = BufferItem::default();

            oldest_index = if oldest_index + 1 < self.window_items {
                oldest_index + 1
            } else {
                0
            };
            self.oldest_item_start_time = self.buffer[oldest_index].time;
        }

        self.oldest_item_index = Some(oldest_index);
    }

    fn reset(&mut self) {
        self.buffer.fill(BufferItem::default());
        self.newest_item_index = None;
        self.oldest_item_index = None;
        self.total_count = 0;
    }
}

/// Per-stream ingress/egress counter: packet count plus a byte-rate window.
pub struct RtpDataCounter {
    rate: RateCalculator,
    packets: u64,
}

impl RtpDataCounter {
    pub fn new(window_size_ms: u64) -> Self {
        Self {
            rate: RateCalculator::new(window_size_ms),
            packets: 0,
        }
    }

    pub fn update(&mut self, packet: &RtpPacketInfo, now_ms: u64) {
        self.packets += 1;
        self.rate.update(packet.payload_size, now_ms);
    }

    pub fn get_bitrate(&mut self, now_ms: u64) -> u32 {
        self.rate.get_rate(now_ms)
    }

    pub fn packet_count(&self) -> u64 {
        self.packets
    }

    pub fn bytes(&self) -> u64 {
        self.rate.bytes()
    }
}
