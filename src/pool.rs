use tracing::trace;
use crate::endpoint::Endpoint;
use crate::transaction::{Transaction, TransactionHandle};

struct Slot {
    /// bumped whenever the slot is freed, invalidating all handles to the previous transaction
    generation: u32,
    in_use: bool,
    /// membership in the registry, i.e. whether lookups by message id see this transaction
    registered: bool,
    transaction: Transaction,
}

/// A fixed number of transaction slots, allocated once. Allocating a slot and registering it
///  for lookup are separate steps so that clearing can undo them in a well-defined order.
pub(crate) struct TransactionPool {
    slots: Vec<Slot>,
    num_in_use: usize,
}

impl TransactionPool {
    pub fn new(capacity: usize, max_packet_size: usize) -> TransactionPool {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                in_use: false,
                registered: false,
                transaction: Transaction::with_packet_capacity(max_packet_size),
            })
            .collect();

        TransactionPool { slots, num_in_use: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.num_in_use
    }

    fn slot(&self, handle: TransactionHandle) -> Option<&Slot> {
        self.slots.get(handle.index())
            .filter(|slot| slot.in_use && slot.generation == handle.generation())
    }

    fn slot_mut(&mut self, handle: TransactionHandle) -> Option<&mut Slot> {
        self.slots.get_mut(handle.index())
            .filter(|slot| slot.in_use && slot.generation == handle.generation())
    }

    /// takes the first free slot, `None` if all slots are in use
    pub fn allocate(&mut self, message_id: u16, endpoint: Endpoint) -> Option<TransactionHandle> {
        let (index, slot) = self.slots.iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.in_use)?;

        slot.in_use = true;
        slot.transaction.init(message_id, endpoint);
        self.num_in_use += 1;
        trace!("allocated transaction slot {} for message id {}", index, message_id);
        Some(TransactionHandle::new(index, slot.generation))
    }

    /// Registering a transaction that is already registered has no effect
    pub fn register(&mut self, handle: TransactionHandle) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.registered = true;
        }
    }

    pub fn unregister(&mut self, handle: TransactionHandle) -> bool {
        match self.slot_mut(handle) {
            Some(slot) if slot.registered => {
                slot.registered = false;
                true
            }
            _ => false,
        }
    }

    /// Returns the slot to the pool. This is a no-op for stale handles, so freeing twice is
    ///  harmless.
    pub fn free(&mut self, handle: TransactionHandle) -> bool {
        let Some(slot) = self.slot_mut(handle) else {
            return false;
        };
        debug_assert!(!slot.registered, "freeing a transaction that is still registered");

        slot.transaction.release();
        slot.registered = false;
        slot.in_use = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.num_in_use -= 1;
        trace!("freed transaction slot {}", handle.index());
        true
    }

    pub fn get(&self, handle: TransactionHandle) -> Option<&Transaction> {
        self.slot(handle).map(|slot| &slot.transaction)
    }

    pub fn get_mut(&mut self, handle: TransactionHandle) -> Option<&mut Transaction> {
        self.slot_mut(handle).map(|slot| &mut slot.transaction)
    }

    #[cfg(test)]
    pub fn is_registered(&self, handle: TransactionHandle) -> bool {
        self.slot(handle).is_some_and(|slot| slot.registered)
    }

    /// linear scan over the registered transactions, returning the first match
    pub fn find_by_message_id(&self, message_id: u16) -> Option<TransactionHandle> {
        self.slots.iter()
            .enumerate()
            .find(|(_, slot)| slot.in_use && slot.registered && slot.transaction.message_id == message_id)
            .map(|(index, slot)| TransactionHandle::new(index, slot.generation))
    }

    /// Correlating a reply needs both keys: message ids are only unique per endpoint
    pub fn find_by_message_id_and_endpoint(&self, message_id: u16, endpoint: &Endpoint) -> Option<TransactionHandle> {
        self.slots.iter()
            .enumerate()
            .find(|(_, slot)| slot.in_use
                && slot.registered
                && slot.transaction.message_id == message_id
                && slot.transaction.endpoint == *endpoint)
            .map(|(index, slot)| TransactionHandle::new(index, slot.generation))
    }

    /// handles of all transactions that are currently in use
    pub fn handles(&self) -> Vec<TransactionHandle> {
        self.slots.iter()
            .enumerate()
            .filter(|(_, slot)| slot.in_use)
            .map(|(index, slot)| TransactionHandle::new(index, slot.generation))
            .collect()
    }
}
