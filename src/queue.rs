//! The admission queue.
//!
//! When the verifying-session cap is reached, connections park here and
//! wait for the 500 ms drain tick to promote them. At most one entry per
//! IP: a re-submission replaces the pending one, which releases the stale
//! waiter. Producers never hold the lock across admission work; the waiter
//! side just awaits its channel.

use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    net::IpAddr,
};
use tokio::sync::oneshot;

/// What a parked connection eventually hears back.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QueueResult {
    /// A verification slot opened up; proceed.
    Admitted,
    /// The queue is being drained for shutdown; disconnect.
    Rejected,
}

/// Outcome of submitting to the queue.
pub enum Submission {
    /// Parked; await the receiver.
    Queued(oneshot::Receiver<QueueResult>),
    /// The queue is full.
    Full,
}

#[derive(Default)]
struct Inner {
    order: VecDeque<IpAddr>,
    pending: HashMap<IpAddr, oneshot::Sender<QueueResult>>,
}

pub struct AdmitQueue {
    inner: Mutex<Inner>,
    max_size: usize,
}

impl AdmitQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_size,
        }
    }

    /// Parks an address. A duplicate submission keeps the original queue
    /// position but replaces the waiter; the replaced waiter's channel is
    /// dropped, which it observes as a cancellation.
    pub fn submit(&self, ip: IpAddr) -> Submission {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if let Some(stale) = inner.pending.insert(ip, tx) {
            drop(stale);
            return Submission::Queued(rx);
        }
        if inner.order.len() >= self.max_size {
            inner.pending.remove(&ip);
            return Submission::Full;
        }
        inner.order.push_back(ip);
        Submission::Queued(rx)
    }

    /// Promotes up to `max_polls` waiters in insertion order. Entries whose
    /// waiter has gone away are skipped without counting against the
    /// budget. Returns how many were actually admitted.
    pub fn poll(&self, max_polls: usize) -> usize {
        let mut inner = self.inner.lock();
        let mut admitted = 0;
        while admitted < max_polls {
            let Some(ip) = inner.order.pop_front() else {
                break;
            };
            let Some(waiter) = inner.pending.remove(&ip) else {
                continue;
            };
            if waiter.send(QueueResult::Admitted).is_ok() {
                admitted += 1;
            }
        }
        admitted
    }

    /// Rejects every pending waiter; used during shutdown.
    pub fn drain(&self) {
        let mut inner = self.inner.lock();
        inner.order.clear();
        for (_, waiter) in inner.pending.drain() {
            waiter.send(QueueResult::Rejected).ok();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test]
    async fn promotes_in_insertion_order() {
        let queue = AdmitQueue::new(16);
        let Submission::Queued(mut first) = queue.submit(ip(1)) else {
            panic!("queue full")
        };
        let Submission::Queued(mut second) = queue.submit(ip(2)) else {
            panic!("queue full")
        };

        assert_eq!(queue.poll(1), 1);
        assert_eq!(first.try_recv().unwrap(), QueueResult::Admitted);
        assert!(second.try_recv().is_err());

        assert_eq!(queue.poll(1), 1);
        assert_eq!(second.try_recv().unwrap(), QueueResult::Admitted);
    }

    #[tokio::test]
    async fn poll_budget_is_bounded() {
        let queue = AdmitQueue::new(16);
        let receivers: Vec<_> = (1..=5)
            .map(|i| match queue.submit(ip(i)) {
                Submission::Queued(rx) => rx,
                Submission::Full => panic!("queue full"),
            })
            .collect();

        assert_eq!(queue.poll(3), 3);
        assert_eq!(queue.len(), 2);
        drop(receivers);
    }

    #[tokio::test]
    async fn duplicate_replaces_waiter() {
        let queue = AdmitQueue::new(16);
        let Submission::Queued(mut stale) = queue.submit(ip(1)) else {
            panic!("queue full")
        };
        let Submission::Queued(mut fresh) = queue.submit(ip(1)) else {
            panic!("queue full")
        };

        // The replaced waiter observes a cancellation.
        assert!(matches!(
            stale.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));

        assert_eq!(queue.poll(8), 1);
        assert_eq!(fresh.try_recv().unwrap(), QueueResult::Admitted);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn full_queue_rejects() {
        let queue = AdmitQueue::new(1);
        let _first = queue.submit(ip(1));
        assert!(matches!(queue.submit(ip(2)), Submission::Full));
    }

    #[tokio::test]
    async fn drain_rejects_everyone() {
        let queue = AdmitQueue::new(16);
        let Submission::Queued(mut waiter) = queue.submit(ip(1)) else {
            panic!("queue full")
        };
        queue.drain();
        assert_eq!(waiter.try_recv().unwrap(), QueueResult::Rejected);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn dead_waiters_do_not_consume_budget() {
        let queue = AdmitQueue::new(16);
        let Submission::Queued(dead) = queue.submit(ip(1)) else {
            panic!("queue full")
        };
        drop(dead);
        let Submission::Queued(mut live) = queue.submit(ip(2)) else {
            panic!("queue full")
        };

        assert_eq!(queue.poll(1), 1);
        assert_eq!(live.try_recv().unwrap(), QueueResult::Admitted);
    }
}
