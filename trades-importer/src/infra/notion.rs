use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use tracing::debug;

use trades_core::{HoldingDraft, HoldingId, ImportError, Result};

use crate::app::ports::{HoldingsPort, TransactionsPort};
use crate::config::ImporterConfig;
use crate::pipeline::link::TransactionPayload;
use crate::schema;
use crate::schema::holdings as props;

const API_BASE: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const QUERY_PAGE_SIZE: u32 = 100;

/// Notion API adapter behind the holdings and transactions ports.
pub struct NotionClient {
    http: reqwest::Client,
    token: String,
    transactions_db_id: String,
    holdings_db_id: String,
}

impl NotionClient {
    pub fn new(config: &ImporterConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: config.notion_token.clone(),
            transactions_db_id: config.transactions_db_id.clone(),
            holdings_db_id: config.holdings_db_id.clone(),
        }
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| ImportError::Remote {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<f64>().ok())
                .map(Duration::from_secs_f64);
            return Err(ImportError::Throttled { retry_after });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ImportError::Remote {
                message: format!("HTTP {}: {}", status.as_u16(), truncate(&body, 500)),
            });
        }

        response.json::<Value>().await.map_err(|e| ImportError::Remote {
            message: e.to_string(),
        })
    }

    async fn query_database(&self, database_id: &str, body: Value) -> Result<Value> {
        self.post(&format!("{API_BASE}/databases/{database_id}/query"), &body)
            .await
    }

    async fn create_page(&self, database_id: &str, properties: Value) -> Result<Value> {
        let body = json!({
            "parent": { "database_id": database_id },
            "properties": properties,
        });
        self.post(&format!("{API_BASE}/pages"), &body).await
    }
}

#[async_trait]
impl HoldingsPort for NotionClient {
    async fn find_by_code(&self, code: &str) -> Result<Option<HoldingId>> {
        let body = json!({
            "filter": {
                "property": props::SECURITY_CODE,
                "rich_text": { "equals": code },
            },
            "page_size": 1,
        });
        let data = self.query_database(&self.holdings_db_id, body).await?;
        match data
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
        {
            Some(page) => page_id(page).map(Some),
            None => Ok(None),
        }
    }

    async fn create_holding(&self, draft: &HoldingDraft) -> Result<HoldingId> {
        let mut properties = Map::new();
        properties.insert(props::TITLE.to_string(), schema::title(&draft.title()));
        properties.insert(
            props::SECURITY_CODE.to_string(),
            schema::rich_text(&draft.security_code),
        );
        if !draft.market.is_empty() {
            properties.insert(
                props::MARKET.to_string(),
                schema::select(&schema::market_option(&draft.market)),
            );
        }
        properties.insert(
            props::SECURITY_TYPE.to_string(),
            schema::select(draft.security_type()),
        );
        properties.insert(
            props::EXCHANGE_CODE.to_string(),
            schema::rich_text(draft.exchange_code()),
        );
        properties.insert(
            props::OPEN_DATE.to_string(),
            schema::date(&Utc::now().format("%Y-%m-%d").to_string()),
        );
        properties.insert(props::QUANTITY.to_string(), schema::number(0.0));
        properties.insert(props::COST_PRICE.to_string(), schema::number(0.0));

        debug!(code = %draft.security_code, "creating holding page");
        let page = self
            .create_page(&self.holdings_db_id, Value::Object(properties))
            .await?;
        page_id(&page)
    }
}

#[async_trait]
impl TransactionsPort for NotionClient {
    async fn existing_order_numbers(&self) -> Result<HashSet<String>> {
        let mut known = HashSet::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({ "page_size": QUERY_PAGE_SIZE });
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }
            let data = self.query_database(&self.transactions_db_id, body).await?;

            if let Some(results) = data.get("results").and_then(Value::as_array) {
                for page in results {
                    let order_no = page
                        .get("properties")
                        .and_then(|properties| properties.get(schema::transactions::ORDER_NO))
                        .and_then(rich_text_content);
                    if let Some(order_no) = order_no {
                        known.insert(order_no);
                    }
                }
            }

            if !data.get("has_more").and_then(Value::as_bool).unwrap_or(false) {
                break;
            }
            cursor = data
                .get("next_cursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }

        debug!(count = known.len(), "fetched existing order numbers");
        Ok(known)
    }

    async fn create_transaction(&self, payload: &TransactionPayload) -> Result<()> {
        self.create_page(&self.transactions_db_id, payload.properties.clone())
            .await
            .map(|_| ())
    }
}

fn page_id(page: &Value) -> Result<HoldingId> {
    page.get("id")
        .and_then(Value::as_str)
        .map(|id| HoldingId(id.to_string()))
        .ok_or_else(|| ImportError::Remote {
            message: "page response missing id".to_string(),
        })
}

fn rich_text_content(property: &Value) -> Option<String> {
    let fragment = property.get("rich_text")?.get(0)?;
    let text = fragment
        .get("plain_text")
        .and_then(Value::as_str)
        .or_else(|| {
            fragment
                .get("text")
                .and_then(|text| text.get("content"))
                .and_then(Value::as_str)
        })?;
    Some(text.to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rich_text_content_prefers_plain_text() {
        let property = json!({
            "rich_text": [{ "plain_text": "A10001", "text": { "content": "ignored" } }]
        });
        assert_eq!(rich_text_content(&property).as_deref(), Some("A10001"));
    }

    #[test]
    fn test_rich_text_content_falls_back_to_text_content() {
        let property = json!({ "rich_text": [{ "text": { "content": "A10001" } }] });
        assert_eq!(rich_text_content(&property).as_deref(), Some("A10001"));
    }

    #[test]
    fn test_rich_text_content_empty_property() {
        assert_eq!(rich_text_content(&json!({ "rich_text": [] })), None);
        assert_eq!(rich_text_content(&json!({})), None);
    }

    #[test]
    fn test_page_id_extraction() {
        assert_eq!(
            page_id(&json!({ "id": "abc" })).unwrap(),
            HoldingId("abc".to_string())
        );
        assert!(page_id(&json!({})).is_err());
    }
}
