//! Registry of per-group mutual exclusion tokens
//!
//! One lock per group id, created on first use and kept for the lifetime of
//! the registry. Entries are never removed, so an executor fed an unbounded
//! stream of distinct groups grows without limit; `len` makes that visible.

use crate::task::GroupId;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug, Default)]
struct GroupState {
    held: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Exclusive gate shared by every task of one group.
///
/// Places in line are handed out synchronously by [`GroupLock::reserve`] and
/// honoured strictly first come, first served. Cloning yields another
/// reference to the same gate.
#[derive(Debug, Clone, Default)]
pub struct GroupLock {
    state: Arc<Mutex<GroupState>>,
}

impl GroupLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a place in line without waiting.
    ///
    /// The ticket is already ready when the gate was free.
    pub fn reserve(&self) -> GroupTicket {
        let mut state = self.state();
        if !state.held {
            state.held = true;
            return GroupTicket {
                lock: self.clone(),
                inner: Ticket::Ready(GroupPermit { lock: self.clone() }),
            };
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        GroupTicket {
            lock: self.clone(),
            inner: Ticket::Waiting(rx),
        }
    }

    /// Wait for the gate
    pub async fn acquire(&self) -> GroupPermit {
        self.reserve().await
    }

    /// Take the gate only if it is free
    pub fn try_acquire(&self) -> Option<GroupPermit> {
        let mut state = self.state();
        if state.held {
            return None;
        }
        state.held = true;
        Some(GroupPermit { lock: self.clone() })
    }

    pub fn is_held(&self) -> bool {
        self.state().held
    }

    /// Tickets still waiting for their turn
    pub fn waiting(&self) -> usize {
        self.state().waiters.len()
    }

    /// True when both handles refer to the same gate
    pub fn same_lock(&self, other: &GroupLock) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Pass the gate to the oldest live ticket, or open it
    fn release(&self) {
        let mut state = self.state();
        while let Some(next) = state.waiters.pop_front() {
            if next.send(()).is_ok() {
                return;
            }
        }
        state.held = false;
    }
}

/// RAII group permit; dropping it passes the gate on
#[derive(Debug)]
pub struct GroupPermit {
    lock: GroupLock,
}

impl Drop for GroupPermit {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[derive(Debug)]
enum Ticket {
    Ready(GroupPermit),
    Waiting(oneshot::Receiver<()>),
    Taken,
}

/// A reserved place in a group's line. Resolves to the permit when its turn
/// comes; dropping an unresolved ticket gives the place up.
#[derive(Debug)]
pub struct GroupTicket {
    lock: GroupLock,
    inner: Ticket,
}

impl GroupTicket {
    pub fn is_ready(&self) -> bool {
        matches!(self.inner, Ticket::Ready(_))
    }

    /// The permit, if the gate was free at reservation time
    pub fn try_into_permit(mut self) -> Result<GroupPermit, Self> {
        match std::mem::replace(&mut self.inner, Ticket::Taken) {
            Ticket::Ready(permit) => Ok(permit),
            other => {
                self.inner = other;
                Err(self)
            }
        }
    }
}

impl Future for GroupTicket {
    type Output = GroupPermit;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<GroupPermit> {
        let this = self.get_mut();
        loop {
            match &mut this.inner {
                Ticket::Ready(_) => {
                    if let Ticket::Ready(permit) = std::mem::replace(&mut this.inner, Ticket::Taken) {
                        return Poll::Ready(permit);
                    }
                }
                Ticket::Waiting(rx) => match Pin::new(rx).poll(cx) {
                    Poll::Ready(Ok(())) => {
                        this.inner = Ticket::Taken;
                        return Poll::Ready(GroupPermit {
                            lock: this.lock.clone(),
                        });
                    }
                    // Not reached while the ticket lives: senders sit only in
                    // `waiters`, and `release` drops one unsent only after Drop
                    // closed its receiver. Queue again if that ever changes.
                    Poll::Ready(Err(_)) => {
                        this.inner = this.lock.reserve().disarm();
                    }
                    Poll::Pending => return Poll::Pending,
                },
                Ticket::Taken => return Poll::Pending,
            }
        }
    }
}

impl GroupTicket {
    /// Move the ticket's state out, leaving nothing for Drop to release
    fn disarm(mut self) -> Ticket {
        std::mem::replace(&mut self.inner, Ticket::Taken)
    }
}

impl Drop for GroupTicket {
    fn drop(&mut self) {
        if let Ticket::Waiting(rx) = &mut self.inner {
            // A handoff that raced with this drop still has to be passed on
            rx.close();
            if rx.try_recv().is_ok() {
                self.lock.release();
            }
        }
    }
}

/// Concurrent map from group id to its lock
#[derive(Debug, Default)]
pub struct GroupLockRegistry {
    locks: DashMap<GroupId, GroupLock>,
}

impl GroupLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lock for `group_id`, creating it if this is the first request.
    ///
    /// Racing first-time callers for the same id all receive the same lock.
    pub fn lock_for(&self, group_id: GroupId) -> GroupLock {
        self.locks
            .entry(group_id)
            .or_insert_with(|| {
                debug!(group_id = %group_id, "Creating group lock");
                GroupLock::new()
            })
            .clone()
    }

    pub fn contains(&self, group_id: GroupId) -> bool {
        self.locks.contains_key(&group_id)
    }

    /// Number of groups seen so far
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_get_or_create() {
        let registry = GroupLockRegistry::new();
        let group = GroupId::random();
        assert!(registry.is_empty());

        let first = registry.lock_for(group);
        let second = registry.lock_for(group);
        assert!(first.same_lock(&second));
        assert!(registry.contains(group));
        assert_eq!(registry.len(), 1);

        let other = registry.lock_for(GroupId::random());
        assert!(!first.same_lock(&other));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_first_lookup_converges() {
        let registry = Arc::new(GroupLockRegistry::new());
        let group = GroupId::random();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.lock_for(group))
            })
            .collect();

        let locks: Vec<GroupLock> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(locks.iter().all(|lock| lock.same_lock(&locks[0])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_permit_releases_on_drop() {
        let lock = GroupLock::new();
        assert!(!lock.is_held());

        let permit = lock.acquire().await;
        assert!(lock.is_held());
        assert!(lock.try_acquire().is_none());

        drop(permit);
        assert!(!lock.is_held());
        assert!(lock.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_tickets_served_in_reservation_order() {
        let lock = GroupLock::new();
        let first = lock.reserve().try_into_permit().unwrap();

        let second = lock.reserve();
        let third = lock.reserve();
        assert!(!second.is_ready());
        assert_eq!(lock.waiting(), 2);

        let order = Arc::new(Mutex::new(Vec::new()));
        let third_task = {
            let order = Arc::clone(&order);
            tokio::spawn(async move {
                let _permit = third.await;
                order.lock().unwrap().push(3);
            })
        };
        let second_task = {
            let order = Arc::clone(&order);
            tokio::spawn(async move {
                let _permit = second.await;
                order.lock().unwrap().push(2);
                tokio::time::sleep(Duration::from_millis(10)).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(first);
        second_task.await.unwrap();
        third_task.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec![2, 3]);
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_polled_ticket_keeps_its_place() {
        let lock = GroupLock::new();
        let holder = lock.try_acquire().unwrap();

        let mut second = lock.reserve();
        assert!((&mut second).now_or_never().is_none());
        assert!((&mut second).now_or_never().is_none());
        let mut third = lock.reserve();
        assert_eq!(lock.waiting(), 2);

        drop(holder);
        assert!((&mut third).now_or_never().is_none());
        let permit = (&mut second).now_or_never().expect("second ticket was served first");
        assert_eq!(lock.waiting(), 1);

        drop(permit);
        assert!((&mut third).now_or_never().is_some());
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_abandoned_ticket_gives_up_its_place() {
        let lock = GroupLock::new();
        let holder = lock.try_acquire().unwrap();

        let abandoned = lock.reserve();
        let next = lock.reserve();
        drop(abandoned);

        drop(holder);
        let permit = tokio::time::timeout(Duration::from_secs(1), next)
            .await
            .expect("handoff skipped the abandoned ticket");
        assert!(lock.is_held());
        drop(permit);
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_permit_released_when_holder_panics() {
        let lock = GroupLock::new();
        let holder = lock.clone();

        let result = tokio::spawn(async move {
            let _permit = holder.acquire().await;
            panic!("holder failed");
        })
        .await;

        assert!(result.is_err());
        assert!(!lock.is_held());
    }
}
