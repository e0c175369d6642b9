//! Auto-Reveal Scheduling
//!
//! Debounced timer that reveals the votes once every known player has voted.
//! The slot holding the pending timer is touched by commits (schedule,
//! cancel) and by the timer task itself (claim), so it sits behind its own
//! mutex. A timer may only act after claiming its ticket; a cancelled or
//! replaced timer finds its ticket gone and does nothing.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::game::state::IssueId;

/// Identifies one scheduled timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ticket {
    /// Monotonic generation number.
    pub generation: u64,
    /// Active issue when the timer was armed.
    pub issue: IssueId,
}

/// Change of the scheduler's state that subscribers should hear about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// A timer was armed.
    Scheduled(Duration),
    /// A pending timer was stopped.
    Cancelled,
}

struct Pending {
    ticket: Ticket,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    pending: Option<Pending>,
    generation: u64,
}

/// Holds at most one pending reveal timer.
pub struct AutoRevealScheduler {
    delay: Duration,
    slot: Mutex<Slot>,
}

impl AutoRevealScheduler {
    /// Scheduler firing `delay` after everyone voted.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Reconcile the timer with the latest state.
    ///
    /// `all_voted` is the active issue when every player has voted on it and
    /// votes are still hidden, `None` otherwise. `spawn` starts the timer
    /// task for a new ticket.
    pub fn update<F>(&self, all_voted: Option<IssueId>, spawn: F) -> Option<Transition>
    where
        F: FnOnce(Ticket, Duration) -> JoinHandle<()>,
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let current = slot.pending.as_ref().map(|p| p.ticket.issue);

        match (all_voted, current) {
            (Some(issue), Some(running)) if issue == running => None,
            (Some(issue), _) => {
                if let Some(old) = slot.pending.take() {
                    old.handle.abort();
                }
                slot.generation += 1;
                let ticket = Ticket { generation: slot.generation, issue };
                let handle = spawn(ticket, self.delay);
                slot.pending = Some(Pending { ticket, handle });
                debug!(issue = %issue, delay_ms = self.delay.as_millis() as u64, "auto-reveal scheduled");
                Some(Transition::Scheduled(self.delay))
            }
            (None, Some(_)) => {
                Self::stop(&mut slot);
                Some(Transition::Cancelled)
            }
            (None, None) => None,
        }
    }

    /// Stop any pending timer. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        Self::stop(&mut slot)
    }

    /// Called by the timer task when its delay elapsed. Succeeds only if
    /// `ticket` is still the pending one, and removes it.
    pub fn claim(&self, ticket: Ticket) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match &slot.pending {
            Some(pending) if pending.ticket == ticket => {
                slot.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a timer is pending.
    pub fn is_pending(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.pending.is_some()
    }

    fn stop(slot: &mut Slot) -> bool {
        match slot.pending.take() {
            Some(pending) => {
                pending.handle.abort();
                debug!(issue = %pending.ticket.issue, "auto-reveal cancelled");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    fn scheduler() -> Arc<AutoRevealScheduler> {
        Arc::new(AutoRevealScheduler::new(Duration::from_millis(20)))
    }

    fn arm(
        scheduler: &Arc<AutoRevealScheduler>,
        issue: Option<IssueId>,
        fired: &mpsc::UnboundedSender<Ticket>,
    ) -> Option<Transition> {
        let s = scheduler.clone();
        let fired = fired.clone();
        scheduler.update(issue, move |ticket, delay| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if s.claim(ticket) {
                    let _ = fired.send(ticket);
                }
            })
        })
    }

    #[tokio::test]
    async fn test_schedules_once_and_fires() {
        let scheduler = scheduler();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let issue = IssueId::generate();

        assert_eq!(
            arm(&scheduler, Some(issue), &tx),
            Some(Transition::Scheduled(Duration::from_millis(20)))
        );
        assert_eq!(arm(&scheduler, Some(issue), &tx), None);

        let ticket = rx.recv().await.unwrap();
        assert_eq!(ticket.issue, issue);
        assert!(!scheduler.is_pending());
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let scheduler = scheduler();
        let (tx, mut rx) = mpsc::unbounded_channel();

        arm(&scheduler, Some(IssueId::generate()), &tx);
        assert_eq!(arm(&scheduler, None, &tx), Some(Transition::Cancelled));
        assert_eq!(arm(&scheduler, None, &tx), None);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_ticket_cannot_claim() {
        let scheduler = scheduler();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = IssueId::generate();
        let second = IssueId::generate();

        arm(&scheduler, Some(first), &tx);
        let stale = Ticket { generation: 1, issue: first };
        arm(&scheduler, Some(second), &tx);

        assert!(!scheduler.claim(stale));
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.issue, second);
        assert_eq!(fired.generation, 2);
    }
}
