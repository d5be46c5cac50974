/// Fixed-capacity ring of the most recent hop energies for one band.
///
/// Slots start at zero, so statistics taken before the ring has wrapped see
/// the untouched slots as silence. The detector never reads them before
/// warm-up completes.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    values: Vec<f32>,
    index: usize,
    filled: usize,
}

/// Mean and population variance of a history window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryStats {
    pub average: f32,
    pub variance: f32,
}

impl HistoryBuffer {
    /// `capacity` must be non-zero; the detector validates this up front.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            values: vec![0.0; capacity.max(1)],
            index: 0,
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.values.len()
    }

    pub fn push(&mut self, value: f32) {
        self.values[self.index] = value;
        self.index = (self.index + 1) % self.values.len();
        self.filled = (self.filled + 1).min(self.values.len());
    }

    /// Most recently pushed value.
    pub fn latest(&self) -> Option<f32> {
        if self.filled == 0 {
            return None;
        }
        let last = (self.index + self.values.len() - 1) % self.values.len();
        Some(self.values[last])
    }

    pub fn stats(&self) -> HistoryStats {
        let n = self.values.len() as f64;
        let average = self.values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = self
            .values
            .iter()
            .map(|&v| {
                let d = v as f64 - average;
                d * d
            })
            .sum::<f64>()
            / n;

        HistoryStats {
            average: average as f32,
            variance: variance as f32,
        }
    }

    pub fn clear(&mut self) {
        self.values.fill(0.0);
        self.index = 0;
        self.filled = 0;
    }
}
