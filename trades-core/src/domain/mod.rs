use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a trade as reported by the brokerage export. The source
/// label is preserved so unrecognized directions still round-trip into the
/// remote select property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
    Other(String),
}

impl TradeSide {
    pub fn parse(label: &str) -> Self {
        match label.trim() {
            "买入" | "证券买入" => TradeSide::Buy,
            "卖出" | "证券卖出" => TradeSide::Sell,
            other => TradeSide::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            TradeSide::Buy => "买入",
            TradeSide::Sell => "卖出",
            TradeSide::Other(label) => label,
        }
    }
}

/// One parsed line of the brokerage export. Immutable once produced by the
/// normalizer; `line` is the 1-based position in the source file and is the
/// row's identity in failure reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRow {
    pub line: usize,
    pub security_code: String,
    pub security_name: String,
    pub order_no: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub amount: f64,
    pub commission: f64,
    pub stamp_tax: f64,
    pub transfer_fee: f64,
    pub other_fees: f64,
    pub cash_balance: Option<f64>,
    pub market: String,
    pub trade_date: Option<NaiveDate>,
    pub trade_time: Option<NaiveTime>,
}

/// Remote page id of a holding record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoldingId(pub String);

impl HoldingId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What gets created in the holdings database the first time a security
/// code shows up in a run. Quantity and cost price start at zero; this
/// pipeline never updates a holding after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingDraft {
    pub security_code: String,
    pub security_name: String,
    pub market: String,
}

impl HoldingDraft {
    pub fn from_row(row: &TransactionRow) -> Self {
        let name = if row.security_name.is_empty() {
            row.security_code.clone()
        } else {
            row.security_name.clone()
        };
        Self {
            security_code: row.security_code.clone(),
            security_name: name,
            market: row.market.clone(),
        }
    }

    /// Display title in the holdings database, formatted `name(code)`.
    pub fn title(&self) -> String {
        format!("{}({})", self.security_name, self.security_code)
    }

    /// Security classification derived from the code prefix.
    pub fn security_type(&self) -> &'static str {
        let code = self.security_code.as_str();
        if code.starts_with("688") {
            "科创板"
        } else if code.starts_with('6') || code.starts_with('0') || code.starts_with('3') {
            "A股"
        } else if code.starts_with('4') || code.starts_with('8') {
            "新三板"
        } else if code.starts_with('5') {
            "基金"
        } else {
            "其他"
        }
    }

    pub fn exchange_code(&self) -> &'static str {
        let code = self.security_code.as_str();
        if code.starts_with('6') {
            "SH"
        } else if code.starts_with('0') || code.starts_with('2') || code.starts_with('3') {
            "SZ"
        } else {
            "OTHER"
        }
    }
}

/// A row withheld from dispatch because its order number was already seen,
/// either in the destination or earlier in the same file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedRow {
    pub line: usize,
    pub order_no: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureReason {
    MalformedRow(String),
    HoldingCreationFailed(String),
    RateLimitExceeded,
    Remote(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRow {
    pub line: usize,
    pub order_no: Option<String>,
    pub reason: FailureReason,
}

/// Outcome of one import run. `total_rows` counts every row considered
/// after the row limit; unless the run was cancelled, every one of them
/// lands in exactly one of imported / skipped / failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_rows: usize,
    pub imported: usize,
    pub skipped: Vec<SkippedRow>,
    pub failed: Vec<FailedRow>,
    pub cancelled: bool,
}

impl ImportSummary {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Accounting invariant: no row is dropped silently.
    pub fn is_balanced(&self) -> bool {
        self.imported + self.skipped.len() + self.failed.len() == self.total_rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(code: &str) -> HoldingDraft {
        HoldingDraft {
            security_code: code.to_string(),
            security_name: "测试".to_string(),
            market: String::new(),
        }
    }

    #[test]
    fn test_trade_side_parse() {
        assert_eq!(TradeSide::parse("买入"), TradeSide::Buy);
        assert_eq!(TradeSide::parse(" 证券卖出 "), TradeSide::Sell);
        assert_eq!(
            TradeSide::parse("配股"),
            TradeSide::Other("配股".to_string())
        );
        assert_eq!(TradeSide::parse("配股").label(), "配股");
    }

    #[test]
    fn test_holding_title_format() {
        let d = HoldingDraft {
            security_code: "600000".to_string(),
            security_name: "浦发银行".to_string(),
            market: "沪A".to_string(),
        };
        assert_eq!(d.title(), "浦发银行(600000)");
    }

    #[test]
    fn test_security_type_classification() {
        assert_eq!(draft("688981").security_type(), "科创板");
        assert_eq!(draft("600000").security_type(), "A股");
        assert_eq!(draft("000001").security_type(), "A股");
        assert_eq!(draft("300750").security_type(), "A股");
        assert_eq!(draft("830799").security_type(), "新三板");
        assert_eq!(draft("510300").security_type(), "基金");
    }

    #[test]
    fn test_exchange_code() {
        assert_eq!(draft("600000").exchange_code(), "SH");
        assert_eq!(draft("000001").exchange_code(), "SZ");
        assert_eq!(draft("300750").exchange_code(), "SZ");
        assert_eq!(draft("510300").exchange_code(), "OTHER");
    }

    #[test]
    fn test_summary_balance() {
        let summary = ImportSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            total_rows: 3,
            imported: 1,
            skipped: vec![SkippedRow {
                line: 2,
                order_no: "A1".to_string(),
            }],
            failed: vec![FailedRow {
                line: 3,
                order_no: None,
                reason: FailureReason::RateLimitExceeded,
            }],
            cancelled: false,
        };
        assert!(summary.is_balanced());
    }
}
