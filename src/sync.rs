//! Rendezvous barrier between a leader task and its connection tasks.
//!
//! The master alternates work phases with its worker-connection tasks, and a
//! worker alternates with its two peer-connection tasks, always in the same
//! rhythm: the leader releases everyone, the followers run their phase, each
//! follower reports done and parks until the next release. Expressed here as
//! channels: a follower's "done" carries a oneshot sender the leader fires on
//! the next release, so a release can only ever wake followers that have
//! already reported in; followers still busy park on their own later report.

use tokio::sync::{mpsc, oneshot};

use crate::net::NetError;

enum Report {
    Done(oneshot::Sender<()>),
    Failed(NetError),
}

/// Leader side of the barrier.
pub struct Rendezvous {
    members: usize,
    reports: mpsc::Receiver<Report>,
    parked: Vec<oneshot::Sender<()>>,
}

/// Follower side. Cheap to clone; every follower task holds one.
#[derive(Clone)]
pub struct RendezvousHandle {
    reports: mpsc::Sender<Report>,
}

/// The leader has gone away; the follower should end quietly.
#[derive(Debug)]
pub struct Disbanded;

impl Rendezvous {
    pub fn new(members: usize) -> (Self, RendezvousHandle) {
        let (tx, rx) = mpsc::channel(members.max(1) * 2);
        (
            Self { members, reports: rx, parked: Vec::with_capacity(members) },
            RendezvousHandle { reports: tx },
        )
    }

    /// Release every parked follower into the next phase, then block until
    /// all members have reported done. A follower failure aborts the wait.
    pub async fn release_and_wait(&mut self) -> Result<(), NetError> {
        for waker in self.parked.drain(..) {
            let _ = waker.send(());
        }
        while self.parked.len() < self.members {
            match self.reports.recv().await {
                Some(Report::Done(waker)) => self.parked.push(waker),
                Some(Report::Failed(error)) => return Err(error),
                None => return Err(NetError::Disbanded),
            }
        }
        Ok(())
    }
}

impl RendezvousHandle {
    /// Report this follower's phase complete and park until the leader's next
    /// release. Returns `Err(Disbanded)` once the leader is gone.
    pub async fn done_and_wait(&self) -> Result<(), Disbanded> {
        let (waker, parked) = oneshot::channel();
        self.reports
            .send(Report::Done(waker))
            .await
            .map_err(|_| Disbanded)?;
        parked.await.map_err(|_| Disbanded)
    }

    /// Deliver a fatal follower error to the leader.
    pub async fn fail(&self, error: NetError) {
        let _ = self.reports.send(Report::Failed(error)).await;
    }
}
