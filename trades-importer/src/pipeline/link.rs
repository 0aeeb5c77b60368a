use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use trades_core::{HoldingId, TransactionRow};

use crate::schema;
use crate::schema::transactions as props;

/// A transaction create-call ready for dispatch: the Notion properties
/// object, plus the identifiers needed to report the row's outcome.
#[derive(Debug, Clone)]
pub struct TransactionPayload {
    pub line: usize,
    pub order_no: String,
    pub properties: Value,
}

/// Maps a normalized row and its resolved holding onto the transaction
/// page's properties, relation included. Pure; no I/O, so the mapping is
/// testable without a live API.
pub struct RelationLinker {
    imported_at: DateTime<Utc>,
}

impl RelationLinker {
    pub fn new(imported_at: DateTime<Utc>) -> Self {
        Self { imported_at }
    }

    pub fn link(&self, row: &TransactionRow, holding: &HoldingId) -> TransactionPayload {
        let mut properties = Map::new();
        properties.insert(
            props::SECURITY_CODE.to_string(),
            schema::rich_text(&row.security_code),
        );
        if !row.security_name.is_empty() {
            properties.insert(
                props::SECURITY_NAME.to_string(),
                schema::rich_text(&row.security_name),
            );
        }
        properties.insert(props::ORDER_NO.to_string(), schema::rich_text(&row.order_no));
        properties.insert(props::SIDE.to_string(), schema::select(row.side.label()));
        properties.insert(props::QUANTITY.to_string(), schema::number(row.quantity));
        properties.insert(props::PRICE.to_string(), schema::number(row.price));
        properties.insert(props::AMOUNT.to_string(), schema::number(row.amount));
        properties.insert(props::COMMISSION.to_string(), schema::number(row.commission));
        properties.insert(props::OTHER_FEES.to_string(), schema::number(row.other_fees));
        properties.insert(props::STAMP_TAX.to_string(), schema::number(row.stamp_tax));
        properties.insert(
            props::TRANSFER_FEE.to_string(),
            schema::number(row.transfer_fee),
        );
        if let Some(balance) = row.cash_balance {
            properties.insert(props::CASH_BALANCE.to_string(), schema::number(balance));
        }
        if !row.market.is_empty() {
            properties.insert(
                props::MARKET.to_string(),
                schema::select(&schema::market_option(&row.market)),
            );
        }
        if let Some(start) = trade_timestamp(row) {
            properties.insert(props::TRADE_DATE.to_string(), schema::date(&start));
        }
        properties.insert(
            props::HOLDING.to_string(),
            schema::relation(holding.as_str()),
        );
        properties.insert(
            props::REMARK.to_string(),
            schema::rich_text(&format!(
                "外部导入 - {}",
                self.imported_at.format("%Y-%m-%d %H:%M:%S")
            )),
        );

        TransactionPayload {
            line: row.line,
            order_no: row.order_no.clone(),
            properties: Value::Object(properties),
        }
    }
}

/// Trade date and time merge into one ISO 8601 start value; date-only when
/// the export carries no time column.
fn trade_timestamp(row: &TransactionRow) -> Option<String> {
    let date = row.trade_date?;
    Some(match row.trade_time {
        Some(time) => date.and_time(time).format("%Y-%m-%dT%H:%M:%S").to_string(),
        None => date.format("%Y-%m-%d").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use trades_core::TradeSide;

    fn sample_row() -> TransactionRow {
        TransactionRow {
            line: 2,
            security_code: "600000".to_string(),
            security_name: "浦发银行".to_string(),
            order_no: "A10001".to_string(),
            side: TradeSide::Buy,
            quantity: 100.0,
            price: 7.1,
            amount: 710.0,
            commission: 5.0,
            stamp_tax: 0.0,
            transfer_fee: 0.1,
            other_fees: 0.0,
            cash_balance: Some(1000.0),
            market: "沪A".to_string(),
            trade_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            trade_time: NaiveTime::from_hms_opt(9, 31, 0),
        }
    }

    fn linker() -> RelationLinker {
        RelationLinker::new(Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap())
    }

    #[test]
    fn test_relation_points_at_holding_page() {
        let payload = linker().link(&sample_row(), &HoldingId("holding-1".to_string()));
        assert_eq!(
            payload.properties[props::HOLDING]["relation"][0]["id"],
            "holding-1"
        );
    }

    #[test]
    fn test_date_and_time_merge() {
        let payload = linker().link(&sample_row(), &HoldingId("h".to_string()));
        assert_eq!(
            payload.properties[props::TRADE_DATE]["date"]["start"],
            "2024-03-01T09:31:00"
        );
    }

    #[test]
    fn test_date_only_when_time_missing() {
        let mut row = sample_row();
        row.trade_time = None;
        let payload = linker().link(&row, &HoldingId("h".to_string()));
        assert_eq!(
            payload.properties[props::TRADE_DATE]["date"]["start"],
            "2024-03-01"
        );
    }

    #[test]
    fn test_import_remark_is_stamped() {
        let payload = linker().link(&sample_row(), &HoldingId("h".to_string()));
        assert_eq!(
            payload.properties[props::REMARK]["rich_text"][0]["text"]["content"],
            "外部导入 - 2024-03-02 08:00:00"
        );
    }

    #[test]
    fn test_payload_carries_row_identity() {
        let payload = linker().link(&sample_row(), &HoldingId("h".to_string()));
        assert_eq!(payload.line, 2);
        assert_eq!(payload.order_no, "A10001");
        assert_eq!(payload.properties[props::QUANTITY]["number"], 100.0);
        assert_eq!(payload.properties[props::SIDE]["select"]["name"], "买入");
    }
}
