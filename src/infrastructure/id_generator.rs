// ID Generator - time-ordered 64-bit ids shared by pages and stored objects
// Pages, layouts and related records draw from one id space so that an
// association endpoint is unambiguous whatever table it lives in.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const NODE_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

/// 64-bit id layout: [timestamp:41][node:10][sequence:12]
#[derive(Debug)]
pub struct IdGenerator {
    node_id: u16,
    state: Mutex<(u64, u64)>, // (last timestamp, next sequence)
}

impl IdGenerator {
    /// Create a generator for a node; node ids wrap into 10 bits.
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id: node_id & 0x3FF,
            state: Mutex::new((0, 0)),
        }
    }

    fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }

    /// Generate the next id. Ids from one generator are strictly increasing.
    pub fn next_id(&self) -> i64 {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (last_ts, next_seq) = *state;

        let mut now = Self::now_millis().max(last_ts);
        let sequence = if now == last_ts {
            if next_seq > MAX_SEQUENCE {
                // Sequence exhausted for this millisecond, borrow the next one
                now = last_ts + 1;
                0
            } else {
                next_seq
            }
        } else {
            0
        };
        *state = (now, sequence + 1);

        let id = ((now & 0x1FF_FFFF_FFFF) << (NODE_BITS + SEQUENCE_BITS))
            | ((self.node_id as u64) << SEQUENCE_BITS)
            | (sequence & MAX_SEQUENCE);
        id as i64
    }

    /// Extract node id from a generated id
    pub fn extract_node_id(id: i64) -> u16 {
        ((id as u64) >> SEQUENCE_BITS & 0x3FF) as u16
    }

    /// Extract sequence from a generated id
    pub fn extract_sequence(id: i64) -> u16 {
        ((id as u64) & MAX_SEQUENCE) as u16
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation() {
        let generator = IdGenerator::new(123);

        let id1 = generator.next_id();
        let id2 = generator.next_id();
        let id3 = generator.next_id();

        assert!(id1 < id2 && id2 < id3);
        assert!(id1 > 0);

        assert_eq!(IdGenerator::extract_node_id(id1), 123);
        assert_eq!(IdGenerator::extract_node_id(id3), 123);
    }

    #[test]
    fn test_many_ids_stay_unique() {
        let generator = IdGenerator::new(7);
        let mut ids: Vec<i64> = (0..10_000).map(|_| generator.next_id()).collect();
        let len = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), len);
        assert_eq!(generator.node_id(), 7);
    }
}
