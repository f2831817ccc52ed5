//! Per-meeting async locks.
//!
//! A webhook and a poll touching the same meeting are serialised here; work
//! on different meetings never contends. Entries nobody holds are pruned
//! once the table grows past [`PRUNE_THRESHOLD`].
//!
//! [`InFlight`] is the non-blocking counterpart: it marks work that must not
//! run twice at once, and a second claimant simply skips.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const PRUNE_THRESHOLD: usize = 256;

#[derive(Clone, Default)]
pub struct MeetingLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl MeetingLocks {
    pub async fn lock(&self, meeting_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if table.len() >= PRUNE_THRESHOLD {
                table.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            table.entry(meeting_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Clone, Default)]
pub struct InFlight {
    inner: Arc<Mutex<HashSet<i64>>>,
}

impl InFlight {
    /// Claim `meeting_id`, or `None` while another claim on it is alive.
    pub fn try_claim(&self, meeting_id: i64) -> Option<InFlightClaim> {
        let mut claimed = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        claimed.insert(meeting_id).then(|| InFlightClaim {
            set: self.clone(),
            meeting_id,
        })
    }
}

pub struct InFlightClaim {
    set: InFlight,
    meeting_id: i64,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.set
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.meeting_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_meeting_is_serialised() {
        let locks = MeetingLocks::default();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(1).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_meetings_do_not_block() {
        let locks = MeetingLocks::default();
        let _first = locks.lock(1).await;
        let second = tokio::time::timeout(Duration::from_millis(100), locks.lock(2)).await;
        assert!(second.is_ok());
    }

    #[test]
    fn test_in_flight_claim_is_exclusive_until_dropped() {
        let in_flight = InFlight::default();
        let claim = in_flight.try_claim(7);
        assert!(claim.is_some());
        assert!(in_flight.try_claim(7).is_none());
        assert!(in_flight.try_claim(8).is_some());

        drop(claim);
        assert!(in_flight.try_claim(7).is_some());
    }

    #[tokio::test]
    async fn test_idle_entries_are_pruned() {
        let locks = MeetingLocks::default();
        for id in 0..PRUNE_THRESHOLD as i64 {
            drop(locks.lock(id).await);
        }
        let _held = locks.lock(-1).await;
        assert_eq!(locks.len(), 1);
    }
}
