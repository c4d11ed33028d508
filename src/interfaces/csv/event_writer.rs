use crate::domain::transaction::{FailureReason, Transaction, TransactionState};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionEvent {
    Added,
    Changed,
    Removed,
}

/// One row of the transaction log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub product: String,
    pub event: TransactionEvent,
    pub state: TransactionState,
    pub failure_reason: FailureReason,
    pub transaction_id: Option<String>,
    pub token_valid: bool,
}

impl TransactionRecord {
    pub fn new(event: TransactionEvent, transaction: &Transaction) -> Self {
        Self {
            product: transaction.product_id.clone(),
            event,
            state: transaction.state,
            failure_reason: transaction.failure_reason,
            transaction_id: transaction.transaction_id.clone(),
            token_valid: transaction.token.is_valid(),
        }
    }
}

/// Writes transaction lifecycle events as CSV, header first.
pub struct TransactionEventWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> TransactionEventWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_records(&mut self, records: impl IntoIterator<Item = TransactionRecord>) -> Result<()> {
        for record in records {
            self.writer.serialize(record)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::TransactionUpdate;

    #[test]
    fn test_writes_header_and_rows() {
        let mut transaction = Transaction::new(1, "gems_100");
        let added = TransactionRecord::new(TransactionEvent::Added, &transaction);
        transaction
            .apply(TransactionUpdate::failed(FailureReason::UserCancelled))
            .unwrap();
        let removed = TransactionRecord::new(TransactionEvent::Removed, &transaction);

        let mut out = Vec::new();
        TransactionEventWriter::new(&mut out)
            .write_records([added, removed])
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "product,event,state,failure_reason,transaction_id,token_valid",
                "gems_100,added,user_performing_purchase,none,,false",
                "gems_100,removed,failed,user_cancelled,,false",
            ]
        );
    }
}
