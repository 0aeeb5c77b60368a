use std::collections::HashSet;

use tracing::debug;
use trades_core::{SkippedRow, TransactionRow};

/// Splits normalized rows into rows to import and rows whose order number
/// was already seen. Seeded with the destination's order numbers; claims
/// each passed order number as it goes, so a repeated row inside the same
/// file is also caught (first occurrence wins).
pub struct DedupFilter {
    seen: HashSet<String>,
}

pub struct DedupOutcome {
    pub to_import: Vec<TransactionRow>,
    pub skipped: Vec<SkippedRow>,
}

impl DedupFilter {
    pub fn new(known_order_numbers: HashSet<String>) -> Self {
        Self {
            seen: known_order_numbers,
        }
    }

    pub fn partition(mut self, rows: Vec<TransactionRow>) -> DedupOutcome {
        let mut to_import = Vec::new();
        let mut skipped = Vec::new();

        for row in rows {
            if self.seen.contains(&row.order_no) {
                debug!(line = row.line, order_no = %row.order_no, "skipping duplicate order number");
                skipped.push(SkippedRow {
                    line: row.line,
                    order_no: row.order_no,
                });
            } else {
                self.seen.insert(row.order_no.clone());
                to_import.push(row);
            }
        }

        DedupOutcome { to_import, skipped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trades_core::TradeSide;

    fn row(line: usize, code: &str, order_no: &str) -> TransactionRow {
        TransactionRow {
            line,
            security_code: code.to_string(),
            security_name: String::new(),
            order_no: order_no.to_string(),
            side: TradeSide::Buy,
            quantity: 0.0,
            price: 0.0,
            amount: 0.0,
            commission: 0.0,
            stamp_tax: 0.0,
            transfer_fee: 0.0,
            other_fees: 0.0,
            cash_balance: None,
            market: String::new(),
            trade_date: None,
            trade_time: None,
        }
    }

    #[test]
    fn test_known_order_numbers_are_skipped() {
        let known = HashSet::from(["A1".to_string()]);
        let outcome =
            DedupFilter::new(known).partition(vec![row(2, "600000", "A1"), row(3, "600000", "A2")]);

        assert_eq!(outcome.to_import.len(), 1);
        assert_eq!(outcome.to_import[0].order_no, "A2");
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].order_no, "A1");
    }

    #[test]
    fn test_intra_file_duplicate_first_wins() {
        // Same order number on two rows of one file: the first row goes
        // through, the second is skipped even with an empty destination.
        let outcome = DedupFilter::new(HashSet::new()).partition(vec![
            row(2, "600000", "A1"),
            row(3, "600000", "A2"),
            row(4, "600519", "A1"),
        ]);

        let imported: Vec<_> = outcome
            .to_import
            .iter()
            .map(|r| (r.security_code.as_str(), r.order_no.as_str()))
            .collect();
        assert_eq!(imported, vec![("600000", "A1"), ("600000", "A2")]);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].line, 4);
    }

    #[test]
    fn test_input_order_preserved() {
        let outcome = DedupFilter::new(HashSet::new()).partition(vec![
            row(2, "a", "O3"),
            row(3, "b", "O1"),
            row(4, "c", "O2"),
        ]);
        let order: Vec<_> = outcome.to_import.iter().map(|r| r.line).collect();
        assert_eq!(order, vec![2, 3, 4]);
    }
}
