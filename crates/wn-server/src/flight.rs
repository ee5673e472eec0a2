//! In-process single-flight registry.
//!
//! Concurrent requests for the same content key share one normalization: the
//! first registers a flight and leads, the rest follow and receive the
//! leader's outcome. The filesystem claim stays authoritative; this map only
//! keeps same-process duplicates from queueing behind each other.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use wn_core::{ContentKey, Error};

/// What a leader publishes to its followers.
pub type FlightOutcome<T> = Result<T, Arc<Error>>;

type Slot<T> = watch::Receiver<Option<FlightOutcome<T>>>;

/// Active flights keyed by content.
#[derive(Debug)]
pub struct FlightRegistry<T> {
    flights: DashMap<ContentKey, Slot<T>>,
}

/// Role assigned by [`FlightRegistry::join`].
#[derive(Debug)]
pub enum Flight<T> {
    Leader(FlightLead<T>),
    Follower(FlightFollow<T>),
}

impl<T: Clone> Default for FlightRegistry<T> {
    fn default() -> Self {
        Self {
            flights: DashMap::new(),
        }
    }
}

impl<T: Clone> FlightRegistry<T> {
    /// Lead a new flight for `key`, or follow the one already running.
    pub fn join(self: &Arc<Self>, key: &ContentKey) -> Flight<T> {
        match self.flights.entry(key.clone()) {
            Entry::Occupied(existing) => Flight::Follower(FlightFollow {
                rx: existing.get().clone(),
            }),
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                slot.insert(rx);
                Flight::Leader(FlightLead {
                    key: key.clone(),
                    tx,
                    registry: Arc::clone(self),
                })
            }
        }
    }

    /// Number of keys with a flight in progress.
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}

/// Held by the leader. Dropping it ends the flight; followers that did not
/// get an outcome are told to retry.
#[derive(Debug)]
pub struct FlightLead<T> {
    key: ContentKey,
    tx: watch::Sender<Option<FlightOutcome<T>>>,
    registry: Arc<FlightRegistry<T>>,
}

impl<T> FlightLead<T> {
    /// Publish the outcome to every follower and end the flight.
    pub fn complete(self, outcome: FlightOutcome<T>) {
        self.tx.send_replace(Some(outcome));
    }
}

impl<T> Drop for FlightLead<T> {
    fn drop(&mut self) {
        self.registry.flights.remove(&self.key);
    }
}

/// Held by a follower.
#[derive(Debug)]
pub struct FlightFollow<T> {
    rx: Slot<T>,
}

impl<T: Clone> FlightFollow<T> {
    /// Wait for the leader's outcome.
    ///
    /// `None` means the leader went away without publishing one.
    pub async fn outcome(mut self) -> Option<FlightOutcome<T>> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(published) => published.clone(),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<FlightRegistry<u64>> {
        Arc::new(FlightRegistry::default())
    }

    fn lead(flight: Flight<u64>) -> FlightLead<u64> {
        match flight {
            Flight::Leader(lead) => lead,
            Flight::Follower(_) => panic!("expected to lead"),
        }
    }

    fn follow(flight: Flight<u64>) -> FlightFollow<u64> {
        match flight {
            Flight::Follower(follow) => follow,
            Flight::Leader(_) => panic!("expected to follow"),
        }
    }

    #[tokio::test]
    async fn second_join_follows_first() {
        let reg = registry();
        let key = ContentKey::of(b"a");

        let leader = lead(reg.join(&key));
        let follower = follow(reg.join(&key));
        assert_eq!(reg.len(), 1);

        let waiting = tokio::spawn(follower.outcome());
        leader.complete(Ok(42));

        assert_eq!(waiting.await.unwrap().unwrap().unwrap(), 42);
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn distinct_keys_fly_independently() {
        let reg = registry();
        let _a = lead(reg.join(&ContentKey::of(b"a")));
        let _b = lead(reg.join(&ContentKey::of(b"b")));
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn failures_are_shared() {
        let reg = registry();
        let key = ContentKey::of(b"a");
        let leader = lead(reg.join(&key));
        let followers: Vec<_> = (0..3).map(|_| follow(reg.join(&key))).collect();

        leader.complete(Err(Arc::new(Error::EmptyOutput {
            tool: "ffmpeg".into(),
        })));

        for follower in followers {
            let err = follower.outcome().await.unwrap().unwrap_err();
            assert!(matches!(*err, Error::EmptyOutput { .. }));
        }
    }

    #[tokio::test]
    async fn dropped_leader_releases_followers() {
        let reg = registry();
        let key = ContentKey::of(b"a");
        let leader = lead(reg.join(&key));
        let follower = follow(reg.join(&key));

        drop(leader);
        assert!(follower.outcome().await.is_none());
        assert!(reg.is_empty());
        // The next request leads a fresh flight.
        let _next = lead(reg.join(&key));
    }

    #[tokio::test]
    async fn late_follower_sees_published_outcome() {
        let reg = registry();
        let key = ContentKey::of(b"a");
        let leader = lead(reg.join(&key));

        // Grab the slot before the leader finishes, read it after.
        let follower = follow(reg.join(&key));
        leader.complete(Ok(7));
        assert_eq!(follower.outcome().await.unwrap().unwrap(), 7);
    }
}
