//! Fair-queue arbiter: a single scheduler task granting permits in arrival
//! order, one holder at a time.
//!
//! Actors talk to the scheduler through [`FairQueueHandle`]; the scheduler
//! owns the queue outright, so no lock guards it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::{Arbiter, Permit};
use crate::actor::{ActorContext, StopSignal};
use crate::events::EventKind;
use crate::resource::ArbitrationError;
use crate::topology::ActorId;

/// Messages accepted by the fair-queue scheduler.
#[derive(Debug)]
pub enum FairQueueCommand {
    /// Join the back of the queue. The permit arrives on `responder`.
    Enqueue {
        actor: ActorId,
        responder: oneshot::Sender<Permit>,
    },
    /// Holder finished; grant the next waiter.
    Complete { permit: Permit },
}

/// Creates a connected handle and scheduler.
pub fn fair_queue(poll: Duration) -> (FairQueueHandle, FairQueueService) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let grants = Arc::new(AtomicU64::new(0));
    let handle = FairQueueHandle {
        sender,
        poll,
        grants: grants.clone(),
    };
    let service = FairQueueService {
        receiver,
        queue: VecDeque::new(),
        current: None,
        grants,
        poll,
    };
    (handle, service)
}

/// Scheduler half of the fair queue. Consumed by [`FairQueueService::run`].
#[derive(Debug)]
pub struct FairQueueService {
    receiver: mpsc::UnboundedReceiver<FairQueueCommand>,
    queue: VecDeque<(ActorId, oneshot::Sender<Permit>)>,
    current: Option<Permit>,
    grants: Arc<AtomicU64>,
    poll: Duration,
}

impl FairQueueService {
    /// Serves commands until `stop` is observed or every handle is dropped.
    ///
    /// Waiters still queued on exit see their responder dropped.
    pub async fn run(mut self, stop: StopSignal) {
        tracing::debug!("Fair queue scheduler started");

        loop {
            if stop.is_triggered() {
                break;
            }

            tokio::select! {
                command = self.receiver.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = tokio::time::sleep(self.poll) => {}
            }
        }

        tracing::debug!(
            "Fair queue scheduler stopped with {} waiters after {} grants",
            self.queue.len(),
            self.grants.load(Ordering::Relaxed)
        );
    }

    fn handle_command(&mut self, command: FairQueueCommand) {
        match command {
            FairQueueCommand::Enqueue { actor, responder } => {
                self.queue.push_back((actor, responder));
            }
            FairQueueCommand::Complete { permit } => {
                if self.current == Some(permit) {
                    self.current = None;
                } else {
                    tracing::warn!(
                        "{} completed ticket {} but {:?} holds the queue",
                        permit.actor,
                        permit.ticket,
                        self.current
                    );
                }
            }
        }

        self.grant_next();
    }

    fn grant_next(&mut self) {
        while self.current.is_none() {
            let Some((actor, responder)) = self.queue.pop_front() else {
                return;
            };
            if responder.is_closed() {
                continue;
            }

            let permit = Permit {
                actor,
                ticket: self.grants.fetch_add(1, Ordering::Relaxed) + 1,
            };
            if responder.send(permit).is_ok() {
                self.current = Some(permit);
            }
        }
    }
}

/// Actor-side half of the fair queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FairQueueHandle {
    sender: mpsc::UnboundedSender<FairQueueCommand>,
    poll: Duration,
    grants: Arc<AtomicU64>,
}

impl FairQueueHandle {
    /// Number of permits granted so far.
    pub fn grants_issued(&self) -> u64 {
        self.grants.load(Ordering::Relaxed)
    }

    fn enqueue(&self, actor: ActorId) -> Result<oneshot::Receiver<Permit>, ArbitrationError> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(FairQueueCommand::Enqueue { actor, responder })
            .map_err(|_| ArbitrationError::ArbiterUnavailable)?;
        Ok(receiver)
    }
}

#[async_trait]
impl Arbiter for FairQueueHandle {
    async fn request(&self, actor: &ActorContext) -> Result<Option<Permit>, ArbitrationError> {
        if actor.is_stopped() {
            return Ok(None);
        }
        let mut receiver = self.enqueue(actor.id())?;

        loop {
            if actor.is_stopped() {
                receiver.close();
                // Grant raced the cancellation; hand it straight back.
                if let Ok(permit) = receiver.try_recv() {
                    self.release(permit)?;
                }
                return Ok(None);
            }

            match tokio::time::timeout(self.poll, &mut receiver).await {
                Ok(Ok(permit)) => {
                    actor.emit(EventKind::Granted {
                        ticket: permit.ticket,
                    });
                    return Ok(Some(permit));
                }
                Ok(Err(_)) if actor.is_stopped() => return Ok(None),
                Ok(Err(_)) => return Err(ArbitrationError::ArbiterUnavailable),
                Err(_) => continue,
            }
        }
    }

    fn release(&self, permit: Permit) -> Result<(), ArbitrationError> {
        // Scheduler exits on stop; a late completion has nobody to inform.
        let _ = self.sender.send(FairQueueCommand::Complete { permit });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_grants_follow_arrival_order() {
        let (handle, service) = fair_queue(Duration::from_millis(10));
        let stop = StopSignal::new();
        let scheduler = tokio::spawn(service.run(stop.clone()));

        let first = handle.enqueue(ActorId::new(3)).unwrap();
        let mut second = handle.enqueue(ActorId::new(1)).unwrap();

        let permit = first.await.unwrap();
        assert_eq!(permit.actor, ActorId::new(3));
        assert!(second.try_recv().is_err());

        handle.release(permit).unwrap();
        let permit = second.await.unwrap();
        assert_eq!(permit.actor, ActorId::new(1));
        assert_eq!(handle.grants_issued(), 2);

        stop.trigger();
        scheduler.await.unwrap();
    }

    #[tokio::test]
    async fn test_withdrawn_waiter_is_skipped() {
        let (handle, service) = fair_queue(Duration::from_millis(10));
        let stop = StopSignal::new();
        let scheduler = tokio::spawn(service.run(stop.clone()));

        let holder = handle.enqueue(ActorId::new(0)).unwrap();
        let withdrawn = handle.enqueue(ActorId::new(1)).unwrap();
        let waiting = handle.enqueue(ActorId::new(2)).unwrap();

        let permit = holder.await.unwrap();
        drop(withdrawn);
        handle.release(permit).unwrap();

        assert_eq!(waiting.await.unwrap().actor, ActorId::new(2));

        stop.trigger();
        scheduler.await.unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_exit_drops_waiters() {
        let (handle, service) = fair_queue(Duration::from_millis(10));
        let stop = StopSignal::new();
        let scheduler = tokio::spawn(service.run(stop.clone()));

        let holder = handle.enqueue(ActorId::new(0)).unwrap();
        let waiting = handle.enqueue(ActorId::new(1)).unwrap();
        holder.await.unwrap();

        stop.trigger();
        scheduler.await.unwrap();

        assert!(waiting.await.is_err());
        assert!(handle.enqueue(ActorId::new(2)).is_err());
    }
}
