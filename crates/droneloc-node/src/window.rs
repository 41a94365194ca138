//! Rolling multi-channel sample window.

use ndarray::{s, Array2, ArrayView2, Axis};

/// Fixed-capacity ring buffer holding the most recent samples per channel.
///
/// Storage is `channels × capacity`; [`SampleWindow::snapshot`] returns
/// the filled part in chronological order.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    buf: Array2<f32>,
    /// Next column to write.
    head: usize,
    filled: usize,
}

impl SampleWindow {
    /// Create an empty window.
    #[must_use]
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            buf: Array2::zeros((channels, capacity.max(1))),
            head: 0,
            filled: 0,
        }
    }

    /// Append a `channels × n` block, overwriting the oldest samples.
    ///
    /// Rows beyond the window's channel count are ignored; missing rows
    /// are written as silence.
    pub fn append(&mut self, block: ArrayView2<'_, f32>) {
        let capacity = self.capacity();
        let rows = self.channels().min(block.nrows());
        for col in block.axis_iter(Axis(1)) {
            let mut dst = self.buf.column_mut(self.head);
            dst.fill(0.0);
            for ch in 0..rows {
                dst[ch] = col[ch];
            }
            self.head = (self.head + 1) % capacity;
        }
        self.filled = (self.filled + block.ncols()).min(capacity);
    }

    /// Copy of the filled samples, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Array2<f32> {
        let capacity = self.capacity();
        if self.filled < capacity {
            return self.buf.slice(s![.., ..self.filled]).to_owned();
        }
        let mut out = Array2::zeros((self.channels(), capacity));
        let tail = capacity - self.head;
        out.slice_mut(s![.., ..tail])
            .assign(&self.buf.slice(s![.., self.head..]));
        out.slice_mut(s![.., tail..])
            .assign(&self.buf.slice(s![.., ..self.head]));
        out
    }

    /// Number of channels.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.buf.nrows()
    }

    /// Maximum number of samples per channel.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.ncols()
    }

    /// Samples currently held per channel.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filled
    }

    /// `true` before the first append.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// `true` once `capacity` samples have been seen.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.filled == self.capacity()
    }
}
