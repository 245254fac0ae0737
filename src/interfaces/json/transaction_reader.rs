use crate::domain::transaction::Transaction;
use crate::error::{Result, ScreeningError};
use std::io::{BufRead, BufReader, Read};

/// Reads transaction messages from a JSON Lines source, one message per line.
///
/// Blank lines are skipped. A line that is not a valid transaction message
/// yields a `ValidationError` carrying its line number, and reading carries on
/// with the next line.
pub struct TransactionReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> TransactionReader<R> {
    /// Creates a new `TransactionReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
        }
    }

    /// Returns an iterator that lazily reads and deserializes transactions.
    pub fn transactions(self) -> impl Iterator<Item = Result<Transaction>> {
        self.reader
            .lines()
            .enumerate()
            .filter(|(_, line)| !matches!(line, Ok(text) if text.trim().is_empty()))
            .map(|(index, line)| {
                let line = line?;
                serde_json::from_str(&line).map_err(|e| {
                    ScreeningError::ValidationError(format!("line {}: {}", index + 1, e))
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const VALID: &str = r#"{"correlationId":"c-1","tenantId":"345","transactionId":"tx-1","transactionDate":"2024-02-15 11:36:22","direction":"Debit","amount":"345.87","currency":"EUR","sourceAccount":{"accountNo":"1","sortCode":"1","countryCode":"GBR"},"destinationAccount":{"accountNo":"2","sortCode":"2","countryCode":"HKG"}}"#;

    #[test]
    fn test_reader_valid_stream() {
        let data = format!("{}\n\n{}\n", VALID, VALID.replace("tx-1", "tx-2"));
        let results: Vec<Result<Transaction>> =
            TransactionReader::new(data.as_bytes()).transactions().collect();

        assert_eq!(results.len(), 2);
        let tx1 = results[0].as_ref().unwrap();
        assert_eq!(tx1.transaction_id, "tx-1");
        assert_eq!(tx1.amount.value(), dec!(345.87));
        assert_eq!(results[1].as_ref().unwrap().transaction_id, "tx-2");
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = format!("{}\nnot json\n{}", VALID, VALID.replace("345.87", "-1"));
        let results: Vec<Result<Transaction>> =
            TransactionReader::new(data.as_bytes()).transactions().collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(&results[1], Err(ScreeningError::ValidationError(m)) if m.starts_with("line 2")));
        assert!(matches!(&results[2], Err(ScreeningError::ValidationError(m)) if m.starts_with("line 3")));
    }
}
