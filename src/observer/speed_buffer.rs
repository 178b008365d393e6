// Rotor speed history ring buffer.
//
// The write index always names the most recently stored sample, and the
// sample a store evicts is retained so the incremental window sums of the
// averaging steps can be maintained without rescanning the buffer.

use crate::observer::MAX_SPEED_BUFFER_SIZE;

#[derive(Debug, Clone)]
pub(crate) struct SpeedBuffer {
    samples: [i16; MAX_SPEED_BUFFER_SIZE],
    size: u8,
    index: u8,
    oldest_evicted: i16,
}

impl SpeedBuffer {
    /// `size` must already be validated: a power of two within capacity.
    pub(crate) fn new(size: u8) -> Self {
        Self {
            samples: [0; MAX_SPEED_BUFFER_SIZE],
            size,
            index: 0,
            oldest_evicted: 0,
        }
    }

    /// Zero-fills the window; the buffer always holds `size` valid samples.
    pub(crate) fn clear(&mut self) {
        self.samples = [0; MAX_SPEED_BUFFER_SIZE];
        self.index = 0;
        self.oldest_evicted = 0;
    }

    /// Stores the latest rotor speed, retaining the sample it displaces.
    pub(crate) fn store(&mut self, rotor_speed: i16) {
        let mut index = self.index + 1;
        if index == self.size {
            index = 0;
        }

        self.oldest_evicted = self.samples[index as usize];
        self.samples[index as usize] = rotor_speed;
        self.index = index;
    }

    /// Slot index of the most recently stored sample.
    pub(crate) fn index(&self) -> u8 {
        self.index
    }

    pub(crate) fn at(&self, index: u8) -> i16 {
        self.samples[index as usize]
    }

    /// The sample displaced by the latest store.
    pub(crate) fn oldest_evicted(&self) -> i16 {
        self.oldest_evicted
    }

    /// The full averaging window, oldest and newest interleaved by slot.
    pub(crate) fn window(&self) -> &[i16] {
        &self.samples[..self.size as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_zero_filled() {
        let buffer = SpeedBuffer::new(8);
        assert_eq!(buffer.window(), &[0i16; 8]);
        assert_eq!(buffer.index(), 0);
        assert_eq!(buffer.oldest_evicted(), 0);
    }

    #[test]
    fn test_partial_fill_keeps_rotational_order() {
        let mut buffer = SpeedBuffer::new(4);
        buffer.store(10);
        buffer.store(20);
        buffer.store(30);
        // Slot 0 still holds the initial zero fill; writes begin at slot 1.
        assert_eq!(buffer.window(), &[0, 10, 20, 30]);
        assert_eq!(buffer.index(), 3);
        assert_eq!(buffer.at(buffer.index()), 30);
    }

    #[test]
    fn test_wraparound_keeps_last_n_samples() {
        let mut buffer = SpeedBuffer::new(4);
        for value in 1..=10i16 {
            buffer.store(value);
        }
        // Ten stores into four slots: the window holds exactly 7..=10 with
        // the write position rotated by 10 % 4.
        assert_eq!(buffer.window(), &[8, 9, 10, 7]);
        assert_eq!(buffer.at(buffer.index()), 10);
    }

    #[test]
    fn test_eviction_tracking() {
        let mut buffer = SpeedBuffer::new(4);
        for value in 1..=4i16 {
            buffer.store(value);
        }
        // Next store lands on slot 1, displacing the first sample.
        buffer.store(5);
        assert_eq!(buffer.oldest_evicted(), 1);
        buffer.store(6);
        assert_eq!(buffer.oldest_evicted(), 2);
    }

    #[test]
    fn test_window_sum_matches_contents() {
        let mut buffer = SpeedBuffer::new(8);
        let mut incremental: i32 = 0;
        for step in 0..100i32 {
            let value = ((step * 37) % 251 - 125) as i16;
            buffer.store(value);
            incremental += value as i32 - buffer.oldest_evicted() as i32;

            let direct: i32 = buffer.window().iter().map(|&s| s as i32).sum();
            assert_eq!(incremental, direct);
        }
    }
}
