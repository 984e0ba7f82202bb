//! Chronologically ordered, collision resistant keys for new children.
//!
//! A key is 8 characters of millisecond timestamp followed by 12 random
//! characters. Keys generated within the same millisecond increment the random
//! part, so keys from one generator always sort in creation order.

use parking_lot::Mutex;
use rand::Rng;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";
const TIME_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

struct PushIdState {
    last_millis: i64,
    last_random: [u8; RANDOM_CHARS],
}

pub struct PushIdGenerator {
    state: Mutex<PushIdState>,
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PushIdState {
                last_millis: i64::MIN,
                last_random: [0; RANDOM_CHARS],
            }),
        }
    }

    pub fn next(&self) -> String {
        self.next_at(chrono::Utc::now().timestamp_millis())
    }

    fn next_at(&self, now_millis: i64) -> String {
        let mut state = self.state.lock();
        // the clock may step back, never let keys do the same
        let now = now_millis.max(state.last_millis);
        let duplicate = now == state.last_millis;
        state.last_millis = now;

        if duplicate {
            for digit in state.last_random.iter_mut().rev() {
                if *digit == 63 {
                    *digit = 0;
                } else {
                    *digit += 1;
                    break;
                }
            }
        } else {
            let mut rng = rand::thread_rng();
            for digit in state.last_random.iter_mut() {
                *digit = rng.gen_range(0..64);
            }
        }

        let mut key = Vec::with_capacity(TIME_CHARS + RANDOM_CHARS);
        let mut remaining = now.max(0);
        let mut time_chars = [0u8; TIME_CHARS];
        for slot in time_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(remaining % 64) as usize];
            remaining /= 64;
        }
        key.extend_from_slice(&time_chars);
        key.extend(state.last_random.iter().map(|d| PUSH_CHARS[*d as usize]));

        key.into_iter().map(char::from).collect()
    }
}

impl Default for PushIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::storage::is_valid_key;
    use std::collections::HashSet;

    #[test]
    fn test_keys_are_ordered_within_the_same_millisecond() {
        let generator = PushIdGenerator::new();
        let keys: Vec<String> = (0..500).map(|_| generator.next_at(1_600_000_000_000)).collect();

        let unique: HashSet<&String> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());

        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(sorted, keys);
    }

    #[test]
    fn test_keys_follow_the_clock() {
        let generator = PushIdGenerator::new();
        let first = generator.next_at(1_600_000_000_000);
        let second = generator.next_at(1_600_000_000_001);
        // clock stepping back still yields a later key
        let third = generator.next_at(1_599_999_999_000);

        assert!(first < second);
        assert!(second < third);
        assert_eq!(first.len(), 20);
        assert!(is_valid_key(&first));
    }
}
