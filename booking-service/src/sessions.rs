use shared::{BookingError, BookingWorkflow};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::time;
use tracing::info;
use uuid::Uuid;

struct Session {
    workflow: BookingWorkflow,
    touched: Instant,
}

/// Open booking workflows, keyed by session id.
///
/// The lock is never held across an await; callers run synchronous steps
/// through [`with`](Self::with).
#[derive(Clone, Default)]
pub struct BookingSessions {
    inner: Arc<Mutex<HashMap<Uuid, Session>>>,
}

impl BookingSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, workflow: BookingWorkflow) -> Uuid {
        let id = Uuid::new_v4();
        let session = Session {
            workflow,
            touched: Instant::now(),
        };
        self.lock().insert(id, session);
        info!("Opened booking session {}", id);
        id
    }

    /// Runs `f` against the session, or returns `None` if it does not exist.
    pub fn with<R>(&self, id: Uuid, f: impl FnOnce(&mut BookingWorkflow) -> R) -> Option<R> {
        self.lock().get_mut(&id).map(|session| {
            session.touched = Instant::now();
            f(&mut session.workflow)
        })
    }

    /// Drops the session unless a submission is still in flight.
    pub fn abandon(&self, id: Uuid) -> Option<Result<(), BookingError>> {
        let mut sessions = self.lock();
        let session = sessions.get(&id)?;
        if !session.workflow.can_abandon() {
            return Some(Err(BookingError::SubmissionInProgress));
        }
        sessions.remove(&id);
        info!("Closed booking session {}", id);
        Some(Ok(()))
    }

    /// Drops a session whose draft has been consumed by a committed booking.
    pub fn release(&self, id: Uuid) {
        if self.lock().remove(&id).is_some() {
            info!("Released committed booking session {}", id);
        }
    }

    /// Drops sessions untouched for at least `max_idle`, sparing in-flight submissions.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, session| {
            !session.workflow.can_abandon() || session.touched.elapsed() < max_idle
        });
        before - sessions.len()
    }

    pub async fn expire_idle(self, every: Duration, max_idle: Duration) {
        let mut interval = time::interval(every);

        loop {
            interval.tick().await;

            let expired = self.sweep_idle(max_idle);
            if expired > 0 {
                info!("Expired {} idle booking sessions", expired);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Session>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
