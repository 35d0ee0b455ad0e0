//! Append-only packet history and window slicing.

use thiserror::Error;

use crate::types::DataPacket;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HistoryError {
    #[error("packet timestamp {got} precedes history tail {previous}")]
    OutOfOrder { previous: f64, got: f64 },

    #[error("packet timestamp is not a finite number")]
    InvalidTimestamp,
}

/// Invalid scrub / seek request. The session is left untouched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SeekError {
    #[error("no history to seek in")]
    NoHistory,

    #[error("index {index} out of range (history has {len} packets)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("seek time is not a number")]
    NotANumber,

    #[error("time {requested} outside recorded range [{first}, {last}]")]
    TimeOutOfRange { requested: f64, first: f64, last: f64 },
}

/// Ordered record of every packet seen in a session.
///
/// Packets are only ever appended at the tail (non-decreasing timestamps),
/// replaced wholesale, or cleared.
#[derive(Debug, Clone, Default)]
pub struct History {
    packets: Vec<DataPacket>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DataPacket> {
        self.packets.get(index)
    }

    pub fn last(&self) -> Option<&DataPacket> {
        self.packets.last()
    }

    /// Index of the newest packet.
    pub fn tip(&self) -> Option<usize> {
        self.packets.len().checked_sub(1)
    }

    pub fn packets(&self) -> &[DataPacket] {
        &self.packets
    }

    pub fn timestamps(&self) -> impl Iterator<Item = f64> + '_ {
        self.packets.iter().map(|p| p.timestamp)
    }

    /// Append at the tail.
    pub fn push(&mut self, packet: DataPacket) -> Result<(), HistoryError> {
        if !packet.timestamp.is_finite() {
            return Err(HistoryError::InvalidTimestamp);
        }
        if let Some(last) = self.packets.last() {
            if packet.timestamp < last.timestamp {
                return Err(HistoryError::OutOfOrder {
                    previous: last.timestamp,
                    got: packet.timestamp,
                });
            }
        }
        self.packets.push(packet);
        Ok(())
    }

    /// Replace the whole history (batch completion).
    pub fn replace(&mut self, packets: Vec<DataPacket>) -> Result<(), HistoryError> {
        if packets.iter().any(|p| !p.timestamp.is_finite()) {
            return Err(HistoryError::InvalidTimestamp);
        }
        if let Some(w) = packets.windows(2).find(|w| w[1].timestamp < w[0].timestamp) {
            return Err(HistoryError::OutOfOrder {
                previous: w[0].timestamp,
                got: w[1].timestamp,
            });
        }
        self.packets = packets;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }

    pub fn into_packets(self) -> Vec<DataPacket> {
        self.packets
    }

    /// `[0..=index]`, or `None` past the tip.
    pub fn full(&self, index: usize) -> Option<&[DataPacket]> {
        self.packets.get(..=index)
    }

    /// The last `min(window, index + 1)` packets ending at `index`.
    pub fn sliding(&self, index: usize, window: usize) -> Option<&[DataPacket]> {
        let start = (index + 1).saturating_sub(window);
        self.packets.get(start..=index)
    }

    pub fn check_index(&self, index: usize) -> Result<(), SeekError> {
        if self.packets.is_empty() {
            return Err(SeekError::NoHistory);
        }
        if index >= self.packets.len() {
            return Err(SeekError::IndexOutOfRange {
                index,
                len: self.packets.len(),
            });
        }
        Ok(())
    }

    /// Index of the packet whose timestamp is closest to `time` (first on
    /// ties). Times outside the recorded range are rejected.
    pub fn index_at_time(&self, time: f64) -> Result<usize, SeekError> {
        if time.is_nan() {
            return Err(SeekError::NotANumber);
        }
        let (first, last) = match (self.packets.first(), self.packets.last()) {
            (Some(f), Some(l)) => (f.timestamp, l.timestamp),
            _ => return Err(SeekError::NoHistory),
        };
        if time < first || time > last {
            return Err(SeekError::TimeOutOfRange {
                requested: time,
                first,
                last,
            });
        }

        // Timestamps are sorted: the closest is at the partition point or just before it.
        let upper = self.packets.partition_point(|p| p.timestamp < time);
        let index = match upper {
            0 => 0,
            i if i >= self.packets.len() => self.packets.len() - 1,
            i => {
                let below = time - self.packets[i - 1].timestamp;
                let above = self.packets[i].timestamp - time;
                if below <= above {
                    i - 1
                } else {
                    i
                }
            }
        };
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(n: usize) -> History {
        let mut h = History::new();
        for i in 0..n {
            h.push(DataPacket::new(i as f64)).expect("ordered push");
        }
        h
    }

    #[test]
    fn test_sliding_matches_trailing_range() {
        let h = history(40);
        for window in [1, 10, 30, 50] {
            for index in 0..40 {
                let slice = h.sliding(index, window).expect("in range");
                let start = (index + 1).saturating_sub(window);
                assert_eq!(slice.len(), index + 1 - start);
                assert_eq!(slice[0].timestamp, start as f64);
                assert_eq!(slice[slice.len() - 1].timestamp, index as f64);
            }
        }
        assert!(h.sliding(40, 10).is_none());
        assert_eq!(h.full(39).map(<[_]>::len), Some(40));
    }

    #[test]
    fn test_push_rejects_out_of_order() {
        let mut h = history(3);
        let err = h.push(DataPacket::new(1.0)).expect_err("must reject");
        assert_eq!(err, HistoryError::OutOfOrder { previous: 2.0, got: 1.0 });
        assert_eq!(h.len(), 3);

        // Equal timestamps are allowed (non-decreasing)
        h.push(DataPacket::new(2.0)).expect("equal timestamp");
        assert_eq!(h.len(), 4);
    }

    #[test]
    fn test_replace_validates_order() {
        let mut h = history(3);
        let bad = vec![DataPacket::new(5.0), DataPacket::new(4.0)];
        assert!(h.replace(bad).is_err());
        assert_eq!(h.len(), 3, "failed replace leaves history untouched");

        h.replace(vec![DataPacket::new(10.0)]).expect("replace");
        assert_eq!(h.len(), 1);
        h.clear();
        assert!(h.is_empty());
    }

    #[test]
    fn test_index_at_time() {
        let mut h = History::new();
        for t in [0.0, 1.0, 2.5, 4.0] {
            h.push(DataPacket::new(t)).expect("push");
        }
        assert_eq!(h.index_at_time(0.0), Ok(0));
        assert_eq!(h.index_at_time(1.7), Ok(1));
        assert_eq!(h.index_at_time(1.75), Ok(1), "ties resolve to the earlier packet");
        assert_eq!(h.index_at_time(2.0), Ok(2));
        assert_eq!(h.index_at_time(4.0), Ok(3));
        assert!(matches!(h.index_at_time(4.5), Err(SeekError::TimeOutOfRange { .. })));
        assert!(matches!(h.index_at_time(-0.1), Err(SeekError::TimeOutOfRange { .. })));
        assert_eq!(h.index_at_time(f64::NAN), Err(SeekError::NotANumber));
        assert_eq!(History::new().index_at_time(0.0), Err(SeekError::NoHistory));
    }
}
