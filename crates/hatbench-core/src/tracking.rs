//! Stable object identities across a per-frame detection stream.
//!
//! Trackers hand out short-lived ids that get reused once an object leaves
//! the scene. [`TrackResolver`] maps each tracker id to a session-wide global
//! id, keeping it through short tracking gaps and issuing a fresh one when a
//! tracker id reappears after more than `stale_threshold` frames.
//!
//! Frame ids are expected to be non-decreasing. A frame id lower than the
//! last one seen for a track is treated as a zero gap, so the track keeps its
//! global id.

use std::collections::HashMap;
use std::sync::Mutex;

/// Default gap, in frames, after which a reappearing track id is a new object.
pub const DEFAULT_STALE_FRAMES: u64 = 30;

#[derive(Debug, Clone, Copy)]
struct TrackEntry {
    global_id: u64,
    last_seen_frame: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<u64, TrackEntry>,
    next_global_id: u64,
}

/// Maps tracker ids to stable global ids. Safe to share between threads.
#[derive(Debug)]
pub struct TrackResolver {
    stale_threshold: u64,
    inner: Mutex<Inner>,
}

impl Default for TrackResolver {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_FRAMES)
    }
}

impl TrackResolver {
    pub fn new(stale_threshold: u64) -> Self {
        Self {
            stale_threshold,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                next_global_id: 1,
            }),
        }
    }

    pub fn stale_threshold(&self) -> u64 {
        self.stale_threshold
    }

    /// Global id for `track_id` seen at `frame_id`.
    pub fn resolve(&self, track_id: u64, frame_id: u64) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());

        let existing = inner.entries.get(&track_id).copied().filter(|e| {
            frame_id.saturating_sub(e.last_seen_frame) <= self.stale_threshold
        });

        let global_id = match existing {
            Some(entry) => entry.global_id,
            None => {
                let id = inner.next_global_id;
                inner.next_global_id += 1;
                if inner.entries.contains_key(&track_id) {
                    log::debug!("track {track_id} stale at frame {frame_id}, new global id {id}");
                }
                id
            }
        };

        inner.entries.insert(
            track_id,
            TrackEntry {
                global_id,
                last_seen_frame: frame_id,
            },
        );
        global_id
    }

    /// Number of global ids issued so far.
    pub fn issued(&self) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.next_global_id - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn ids_start_at_one_and_increase() {
        let r = TrackResolver::new(30);
        assert_eq!(r.resolve(7, 0), 1);
        assert_eq!(r.resolve(8, 0), 2);
        assert_eq!(r.resolve(7, 1), 1);
        assert_eq!(r.issued(), 2);
    }

    #[test]
    fn gap_beyond_threshold_gets_new_id() {
        let r = TrackResolver::new(30);
        let first = r.resolve(5, 10);
        let second = r.resolve(5, 10 + 30 + 1);
        assert_ne!(first, second);
    }

    #[test]
    fn gap_within_threshold_keeps_id() {
        let r = TrackResolver::new(30);
        let first = r.resolve(5, 10);
        assert_eq!(r.resolve(5, 10 + 30 - 1), first);
        // exactly at the threshold is still the same object
        assert_eq!(r.resolve(5, 10 + 30 - 1 + 30), first);
    }

    #[test]
    fn last_seen_updates_on_every_sighting() {
        let r = TrackResolver::new(5);
        let id = r.resolve(1, 0);
        for frame in (4..=40).step_by(4) {
            assert_eq!(r.resolve(1, frame), id);
        }
    }

    #[test]
    fn stale_ids_are_never_reused() {
        let r = TrackResolver::new(2);
        let a = r.resolve(1, 0);
        let b = r.resolve(1, 10);
        let c = r.resolve(1, 20);
        assert!(a < b && b < c);
    }

    #[test]
    fn backwards_frame_is_not_stale() {
        let r = TrackResolver::new(3);
        let id = r.resolve(9, 100);
        assert_eq!(r.resolve(9, 50), id);
    }

    #[test]
    fn concurrent_resolution_issues_unique_ids() {
        let r = Arc::new(TrackResolver::new(30));
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || {
                    (0..50u64).map(|f| r.resolve(t, f)).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut firsts: Vec<u64> = handles
            .into_iter()
            .map(|h| {
                let ids = h.join().unwrap();
                assert!(ids.windows(2).all(|w| w[0] == w[1]));
                ids[0]
            })
            .collect();
        firsts.sort();
        assert_eq!(firsts, (1..=8).collect::<Vec<_>>());
        assert_eq!(r.issued(), 8);
    }
}
