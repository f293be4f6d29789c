//! Explicit transactions.

use log::{info, warn};

use crate::driver::{PropertyMap, Record};
use crate::error::{OgmError, Result};

use super::OgmClient;

/// Handle to the client's active transaction.
///
/// While the handle is live, every statement the client runs goes through
/// the transaction. Dropping the handle without [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) rolls the transaction back. If another
/// transaction is begun on the same client, this one is rolled back and the
/// handle's operations fail with [`OgmError::TransactionClosed`].
pub struct Transaction<'a> {
    client: &'a OgmClient,
    id: u64,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(client: &'a OgmClient, id: u64) -> Self {
        Self {
            client,
            id,
            finished: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// True while this handle still owns the client's active transaction.
    pub fn is_active(&self) -> bool {
        !self.finished && self.client.active_transaction_id() == Some(self.id)
    }

    /// The client the transaction belongs to; its operations run inside it.
    pub fn client(&self) -> &'a OgmClient {
        self.client
    }

    /// Runs raw statement text inside this transaction.
    pub fn run(&self, text: &str, params: PropertyMap) -> Result<Vec<Record>> {
        if !self.is_active() {
            return Err(OgmError::TransactionClosed);
        }
        self.client.run_custom_query(text, params)
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        let context = self
            .client
            .take_transaction(self.id)
            .ok_or(OgmError::TransactionClosed)?;
        context.commit()?;
        info!("Committed transaction {}", self.id);
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        let context = self
            .client
            .take_transaction(self.id)
            .ok_or(OgmError::TransactionClosed)?;
        context.rollback()?;
        info!("Rolled back transaction {}", self.id);
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(context) = self.client.take_transaction(self.id) {
            warn!(
                "Transaction {} dropped without commit or rollback; rolling back",
                self.id
            );
            if let Err(e) = context.rollback() {
                warn!("Implicit rollback of transaction {} failed: {}", self.id, e);
            }
        }
    }
}
