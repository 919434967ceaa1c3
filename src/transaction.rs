//! Transaction table: id allocation, pending-request tracking, completion.
//!
//! TCP links may keep the entire 16-bit id space in flight at once; serial
//! links allow a single outstanding transaction (id 0) because RTU frames
//! carry no transaction id. Ids are handed out from a free list backed by a
//! high-water counter, so allocation is O(1) regardless of how many
//! transactions are pending.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{ModbusError, ModbusResult};
use crate::function::{Request, Response};

/// Transaction id discipline of the underlying link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Full 16-bit id space, matched via the MBAP header.
    Tcp,
    /// One transaction at a time, always id 0.
    Serial,
}

/// A request awaiting its response.
pub struct PendingTransaction {
    pub request: Request,
    pub completer: oneshot::Sender<ModbusResult<Response>>,
    pub timer: JoinHandle<()>,
}

/// Tracks every in-flight transaction on one connection.
pub struct TransactionTable {
    mode: TransactionMode,
    pending: HashMap<u16, PendingTransaction>,
    /// Next id never handed out. Ids above the current high-water mark are
    /// implicitly free, so no scan of the id space is ever needed.
    next_unused: u32,
    free: Vec<u16>,
}

impl TransactionTable {
    pub fn new(mode: TransactionMode) -> Self {
        Self {
            mode,
            pending: HashMap::new(),
            next_unused: 0,
            free: Vec::new(),
        }
    }

    /// Reserve a transaction id. The caller either inserts a pending entry
    /// under it or hands it back with [`release`].
    ///
    /// [`release`]: TransactionTable::release
    pub fn allocate(&mut self) -> ModbusResult<u16> {
        match self.mode {
            TransactionMode::Serial => {
                if self.pending.is_empty() {
                    Ok(0)
                } else {
                    Err(ModbusError::Busy)
                }
            }
            TransactionMode::Tcp => {
                if let Some(id) = self.free.pop() {
                    return Ok(id);
                }
                if self.next_unused <= u16::MAX as u32 {
                    let id = self.next_unused as u16;
                    self.next_unused += 1;
                    Ok(id)
                } else {
                    Err(ModbusError::TransactionLimit)
                }
            }
        }
    }

    /// Return an id that never got a pending entry.
    pub fn release(&mut self, id: u16) {
        if self.mode == TransactionMode::Tcp {
            self.free.push(id);
        }
    }

    pub fn insert(&mut self, id: u16, transaction: PendingTransaction) {
        self.pending.insert(id, transaction);
    }

    /// Remove a pending transaction. Removal is the single point of
    /// resolution: whoever takes the entry owns its completer, so each
    /// transaction resolves exactly once.
    pub fn take(&mut self, id: u16) -> Option<PendingTransaction> {
        let transaction = self.pending.remove(&id)?;
        self.release(id);
        Some(transaction)
    }

    /// Fail every pending transaction with `err` and reset the id space.
    pub fn reject_all(&mut self, err: ModbusError) {
        for (_, transaction) in self.pending.drain() {
            transaction.timer.abort();
            let _ = transaction.completer.send(Err(err.clone()));
        }
        self.free.clear();
        self.next_unused = 0;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
