//! Property names of the two destination databases, plus constructors for
//! Notion property values. Both the relation linker and the Notion adapter
//! build payloads from these so the mapping lives in one place.

use serde_json::{json, Value};

/// Properties of the transactions database.
pub mod transactions {
    pub const SECURITY_CODE: &str = "证券代码";
    pub const SECURITY_NAME: &str = "证券名称";
    pub const ORDER_NO: &str = "委托编号";
    pub const SIDE: &str = "委托方向";
    pub const QUANTITY: &str = "成交数量";
    pub const PRICE: &str = "成交均价";
    pub const AMOUNT: &str = "成交金额";
    pub const COMMISSION: &str = "佣金";
    pub const OTHER_FEES: &str = "其他费用";
    pub const STAMP_TAX: &str = "印花税";
    pub const TRANSFER_FEE: &str = "过户费";
    pub const CASH_BALANCE: &str = "资金余额";
    pub const MARKET: &str = "交易市场";
    pub const TRADE_DATE: &str = "交易日期";
    pub const HOLDING: &str = "股票持仓";
    pub const REMARK: &str = "备注";
}

/// Properties of the holdings database.
pub mod holdings {
    pub const TITLE: &str = "股票";
    pub const SECURITY_CODE: &str = "证券代码";
    pub const MARKET: &str = "市场";
    pub const SECURITY_TYPE: &str = "证券类型";
    pub const EXCHANGE_CODE: &str = "交易所代码";
    pub const OPEN_DATE: &str = "建仓日期";
    pub const QUANTITY: &str = "持仓数量";
    pub const COST_PRICE: &str = "成本价";
}

/// Maps the raw market label from the export onto the select option used in
/// the destination databases.
pub fn market_option(market: &str) -> String {
    if market.contains('沪') {
        "沪市A股".to_string()
    } else if market.contains('深') {
        "深市A股".to_string()
    } else {
        market.to_string()
    }
}

pub fn title(content: &str) -> Value {
    json!({ "title": [{ "text": { "content": content } }] })
}

pub fn rich_text(content: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": content } }] })
}

pub fn number(value: f64) -> Value {
    json!({ "number": value })
}

pub fn select(option: &str) -> Value {
    json!({ "select": { "name": option } })
}

/// `start` must already be ISO 8601 (date or date-time).
pub fn date(start: &str) -> Value {
    json!({ "date": { "start": start } })
}

pub fn relation(page_id: &str) -> Value {
    json!({ "relation": [{ "id": page_id }] })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_option_mapping() {
        assert_eq!(market_option("沪A"), "沪市A股");
        assert_eq!(market_option("深圳A股"), "深市A股");
        assert_eq!(market_option("港股通"), "港股通");
    }

    #[test]
    fn test_relation_value_shape() {
        let value = relation("page-123");
        assert_eq!(value["relation"][0]["id"], "page-123");
    }

    #[test]
    fn test_rich_text_value_shape() {
        let value = rich_text("A10001");
        assert_eq!(value["rich_text"][0]["text"]["content"], "A10001");
    }
}
