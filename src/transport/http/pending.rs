use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tokio::sync::oneshot;

use crate::errors::TransportError;
use crate::mcp::rpc::Response;

/// Identifies one registration. Ids are reused by clients; tickets never are.
pub type Ticket = u64;

#[derive(Debug)]
struct Slot {
    ticket: Ticket,
    sender: oneshot::Sender<Response>,
}

/// Correlation slots for callers parked on the HTTP endpoint, keyed by the
/// canonical request id.
///
/// A slot is single-use: it is removed from the table before its sender
/// fires, and only a fulfilment carrying the slot's own ticket can claim it.
/// The lock is never held across an await.
#[derive(Debug, Default)]
pub struct PendingCalls {
    slots: Mutex<HashMap<String, Slot>>,
    next_ticket: AtomicU64,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves `key` for one caller. The slot is discarded when the returned
    /// guard drops, including when the caller's connection goes away.
    pub fn register(self: &Arc<Self>, key: &str) -> Result<SlotGuard, TransportError> {
        let mut slots = self.slots();
        if slots.contains_key(key) {
            return Err(TransportError::DuplicateId(key.to_string()));
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        slots.insert(key.to_string(), Slot { ticket, sender });

        Ok(SlotGuard {
            pending: Arc::clone(self),
            key: key.to_string(),
            ticket,
            receiver,
        })
    }

    pub fn fulfill(
        &self,
        key: &str,
        ticket: Ticket,
        response: Response,
    ) -> Result<(), TransportError> {
        let claimed = {
            let mut slots = self.slots();
            if slots.get(key).is_some_and(|slot| slot.ticket == ticket) {
                slots.remove(key)
            } else {
                None
            }
        };
        let slot = claimed.ok_or_else(|| TransportError::NoPendingCall(key.to_string()))?;

        slot.sender
            .send(response)
            .map_err(|_| TransportError::CallerGone(key.to_string()))
    }

    /// Whether the registration behind `ticket` still has a caller waiting.
    pub fn is_live(&self, key: &str, ticket: Ticket) -> bool {
        self.slots()
            .get(key)
            .is_some_and(|slot| slot.ticket == ticket && !slot.sender.is_closed())
    }

    /// Removes the slot only if it still belongs to `ticket`.
    pub fn discard(&self, key: &str, ticket: Ticket) {
        let mut slots = self.slots();
        if slots.get(key).is_some_and(|slot| slot.ticket == ticket) {
            slots.remove(key);
        }
    }

    /// Drops every slot. Parked callers observe a closed channel.
    pub fn release_all(&self) -> usize {
        let mut slots = self.slots();
        let released = slots.len();
        slots.clear();
        released
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

/// A caller's claim on one slot.
#[derive(Debug)]
pub struct SlotGuard {
    pending: Arc<PendingCalls>,
    key: String,
    ticket: Ticket,
    receiver: oneshot::Receiver<Response>,
}

impl SlotGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn response(&mut self) -> &mut oneshot::Receiver<Response> {
        &mut self.receiver
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.pending.discard(&self.key, self.ticket);
    }
}
