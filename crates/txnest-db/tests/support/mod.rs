//! Recording fakes for the transaction traits.

use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use txnest_core::context::Context;
use txnest_db::transaction::{TransactionHandle, TransactionalConnection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Begin(usize),
    Work(&'static str, Option<usize>),
    Commit(usize),
    Rollback(usize),
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct Failure(pub &'static str);

/// Shared, ordered record of everything the fakes were asked to do.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|event| matches(*event)).count()
    }
}

#[derive(Clone, Copy, Default)]
pub struct Behaviour {
    pub fail_commit: bool,
    pub fail_rollback: bool,
    /// Driver calls fail when the context they receive is cancelled.
    pub honour_cancel: bool,
}

pub struct RecordingHandle {
    pub id: usize,
    journal: Journal,
    behaviour: Behaviour,
}

impl TransactionHandle for RecordingHandle {
    fn commit<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, anyhow::Result<()>> {
        async move {
            self.journal.push(Event::Commit(self.id));
            if self.behaviour.honour_cancel {
                ctx.ensure_active()?;
            }
            if self.behaviour.fail_commit {
                return Err(Failure("commit refused").into());
            }
            Ok(())
        }
        .boxed()
    }

    fn rollback<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, anyhow::Result<()>> {
        async move {
            self.journal.push(Event::Rollback(self.id));
            if self.behaviour.fail_rollback {
                return Err(Failure("rollback refused").into());
            }
            Ok(())
        }
        .boxed()
    }
}

#[derive(Default)]
pub struct RecordingConnection {
    pub journal: Journal,
    pub behaviour: Behaviour,
    next_id: Mutex<usize>,
}

impl RecordingConnection {
    pub fn with_behaviour(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            ..Self::default()
        }
    }
}

impl TransactionalConnection for RecordingConnection {
    type Handle = RecordingHandle;

    fn begin<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, anyhow::Result<RecordingHandle>> {
        async move {
            if self.behaviour.honour_cancel {
                ctx.ensure_active()?;
            }
            let id = {
                let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
                *next += 1;
                *next
            };
            self.journal.push(Event::Begin(id));
            Ok(RecordingHandle {
                id,
                journal: self.journal.clone(),
                behaviour: self.behaviour,
            })
        }
        .boxed()
    }
}
