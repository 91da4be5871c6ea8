//! REST client for the chat backend: pharmacy search, room lifecycle,
//! message history, and sends. Response bodies are normalized here so the
//! rest of the crate only ever sees canonical records.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use pharmalink_common::ApiError;

use crate::protocol::ChatMessage;
use crate::session::{Role, SessionContext};

/// One pharmacy in the search results.
#[derive(Debug, Clone, Deserialize)]
pub struct PharmacySummary {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}

/// One chat room in the pharmacy dashboard's room list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomSummary {
    pub id: i64,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub pharmacy_name: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub unread_count: Option<u32>,
}

/// One page of message history, still in the backend's newest-first order.
/// The history loader is responsible for reversing it.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub messages: Vec<ChatMessage>,
    pub current_page: u32,
    pub total_pages: u32,
    pub has_more: bool,
}

/// REST client for the chat endpoints.
pub struct ChatApi {
    base_url: String,
    http: reqwest::Client,
    session: SessionContext,
}

impl ChatApi {
    pub fn new(base_url: impl Into<String>, session: SessionContext) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(10))
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("failed to build HTTP client"),
            session,
        }
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session.access_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Search pharmacies available for chat. Soft-fails: a blank query or
    /// any network/server problem yields an empty result list, logged.
    pub async fn search_pharmacies(&self, query: &str) -> Vec<PharmacySummary> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let url = format!("{}/api/v1/pharmacies/search-for-chat", self.base_url);
        let response = self
            .auth(self.http.get(&url).query(&[("q", query)]))
            .send()
            .await;
        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(body) => parse_search_results(&body),
                Err(e) => {
                    warn!(error = %e, "Search response was not JSON");
                    Vec::new()
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "Pharmacy search failed");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Pharmacy search failed");
                Vec::new()
            }
        }
    }

    /// Start (or resume) a chat with a pharmacy. Returns the room id.
    pub async fn start_chat(&self, pharmacy_id: i64) -> Result<i64, ApiError> {
        let url = format!("{}/api/chats/start", self.base_url);
        let mut body = serde_json::json!({ "pharmacyId": pharmacy_id });
        if self.session.role == Role::Customer {
            body["customerId"] = id_value(&self.session.user_id);
        }

        let resp = self
            .auth(self.http.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ApiError::ParseError(e.to_string()))?;

        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(ApiError::Rejected(error.to_string()));
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: body.to_string(),
            });
        }
        body.get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ApiError::ParseError("start-chat response without id".into()))
    }

    /// Fetch one page of message history. Pages are newest-first on the
    /// wire; per-message normalization failures are logged and skipped.
    pub async fn fetch_messages(
        &self,
        room_id: i64,
        page: u32,
        limit: u32,
    ) -> Result<HistoryPage, ApiError> {
        let url = format!("{}/api/v1/chats/{room_id}/messages", self.base_url);
        let resp = self
            .auth(
                self.http
                    .get(&url)
                    .query(&[("page", page), ("limit", limit)]),
            )
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ApiError::Status {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ApiError::ParseError(e.to_string()))?;
        Ok(parse_history_page(&body, page))
    }

    /// Post a message to the room. The realtime broadcast echo handles
    /// delivery to other participants; this call persists it.
    pub async fn send_message(&self, room_id: i64, text: &str) -> Result<ChatMessage, ApiError> {
        let url = format!("{}/api/v1/chats/{room_id}/messages", self.base_url);
        let resp = self
            .auth(self.http.post(&url).json(&serde_json::json!({ "text": text })))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ApiError::ParseError(e.to_string()))?;

        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(ApiError::Rejected(error.to_string()));
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: body.to_string(),
            });
        }
        ChatMessage::from_wire(&body).map_err(|e| ApiError::ParseError(e.to_string()))
    }

    /// List the pharmacy side's chat rooms (dashboard view).
    pub async fn list_rooms(&self) -> Result<Vec<ChatRoomSummary>, ApiError> {
        let url = format!(
            "{}/api/v1/chats/pharmacy-admin/dashboard/chats",
            self.base_url
        );
        let resp = self
            .auth(self.http.get(&url))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ApiError::Status {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        resp.json::<Vec<ChatRoomSummary>>()
            .await
            .map_err(|e| ApiError::ParseError(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn parse_search_results(body: &Value) -> Vec<PharmacySummary> {
    body.get("results")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|item| match serde_json::from_value(item.clone()) {
                    Ok(summary) => Some(summary),
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed search result");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// The list rides under `messages`, `items`, or `content` depending on the
/// endpoint flavor.
fn parse_history_page(body: &Value, requested_page: u32) -> HistoryPage {
    let list = body
        .get("messages")
        .or_else(|| body.get("items"))
        .or_else(|| body.get("content"))
        .and_then(Value::as_array);

    let messages: Vec<ChatMessage> = list
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match ChatMessage::from_wire(item) {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed history message");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let current_page = body
        .get("currentPage")
        .and_then(Value::as_u64)
        .map(|p| p as u32)
        .unwrap_or(requested_page);
    let total_pages = body
        .get("totalPages")
        .and_then(Value::as_u64)
        .map(|p| p as u32)
        .unwrap_or(if messages.is_empty() { 0 } else { 1 });
    let has_more = body
        .get("hasMore")
        .and_then(Value::as_bool)
        .unwrap_or(current_page + 1 < total_pages);

    HistoryPage {
        messages,
        current_page,
        total_pages,
        has_more,
    }
}

/// User ids are strings locally but the backend wants numbers where it can
/// get them.
fn id_value(user_id: &str) -> Value {
    match user_id.parse::<i64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::from(user_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_results_parsed() {
        let body = json!({"results": [
            {"id": 1, "name": "Central Pharmacy", "address": "1 High St"},
            {"id": 2, "name": "Corner Drugs"}
        ]});
        let results = parse_search_results(&body);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "Central Pharmacy");
        assert_eq!(results[1].address, None);
    }

    #[test]
    fn search_results_missing_key_is_empty() {
        assert!(parse_search_results(&json!({})).is_empty());
        assert!(parse_search_results(&json!({"results": null})).is_empty());
    }

    #[test]
    fn malformed_search_entries_skipped() {
        let body = json!({"results": [
            {"id": 1, "name": "Good"},
            {"name": "No id"}
        ]});
        let results = parse_search_results(&body);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Good");
    }

    #[test]
    fn history_page_accepts_list_key_variants() {
        for key in ["messages", "items", "content"] {
            let body = json!({
                key: [{"id": 1, "text": "hi", "senderId": 2, "senderType": "CUSTOMER"}],
                "currentPage": 0,
                "totalPages": 3,
                "hasMore": true
            });
            let page = parse_history_page(&body, 0);
            assert_eq!(page.messages.len(), 1, "key {key}");
            assert_eq!(page.total_pages, 3);
            assert!(page.has_more);
        }
    }

    #[test]
    fn history_page_defaults_when_cursor_fields_missing() {
        let body = json!({"messages": [
            {"id": 1, "text": "hi", "senderId": 2, "senderType": "CUSTOMER"}
        ]});
        let page = parse_history_page(&body, 0);
        assert_eq!(page.current_page, 0);
        assert_eq!(page.total_pages, 1);
        assert!(!page.has_more);
    }

    #[test]
    fn history_page_skips_malformed_messages() {
        let body = json!({"messages": [
            {"id": 1, "text": "ok", "senderId": 2, "senderType": "CUSTOMER"},
            {"text": "no sender"}
        ], "currentPage": 0, "totalPages": 1, "hasMore": false});
        let page = parse_history_page(&body, 0);
        assert_eq!(page.messages.len(), 1);
    }

    #[test]
    fn empty_history_page() {
        let page = parse_history_page(&json!({}), 2);
        assert!(page.messages.is_empty());
        assert_eq!(page.current_page, 2);
        assert!(!page.has_more);
    }
}
