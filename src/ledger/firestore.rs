//! Firestore ledger over the REST API.
//!
//! | Operation      | Request |
//! |----------------|---------|
//! | `create`       | `POST  …/documents/{collection}` |
//! | `find_by_hash` | `POST  …/documents:runQuery` (`fileHash EQUAL`, `limit 1`) |
//! | `update`       | `PATCH …/documents/{collection}/{id}?updateMask.fieldPaths=…&currentDocument.exists=true` |
//! | `get`          | `GET   …/documents/{collection}/{id}` |
//!
//! Firestore wraps every field in a typed value (`stringValue`,
//! `integerValue`, `timestampValue`, …). Records are encoded field by field
//! and decoded by unwrapping those values into plain JSON, which then goes
//! through [`DocumentRecord`]'s own serde mapping.

use super::DocumentLedger;
use crate::auth::TokenSource;
use crate::error::LedgerError;
use crate::models::{DocumentRecord, FieldUpdate, NewDocument};
use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com/v1";

#[derive(Debug, Clone)]
pub struct FirestoreLedger {
    client: reqwest::Client,
    tokens: Arc<TokenSource>,
    endpoint: String,
    project_id: String,
    database: String,
    collection: String,
}

#[derive(Debug, Deserialize)]
struct FirestoreDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    document: Option<FirestoreDocument>,
}

impl FirestoreLedger {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<TokenSource>,
        project_id: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tokens,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            project_id: project_id.into(),
            database: "(default)".to_string(),
            collection: collection.into(),
        }
    }

    /// Point at a different endpoint, e.g. the Firestore emulator.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    fn documents_root(&self) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents",
            self.endpoint, self.project_id, self.database
        )
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.documents_root(), self.collection)
    }

    fn document_url(&self, id: &str) -> String {
        format!("{}/{}", self.collection_url(), id)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        id: Option<&str>,
    ) -> Result<reqwest::Response, LedgerError> {
        let token = self.tokens.token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(LedgerError::NotFound(id.to_string()));
            }
        }
        Err(LedgerError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

// ── Value encoding ───────────────────────────────────────────────────────

fn string_value(s: &str) -> Value {
    json!({ "stringValue": s })
}

fn update_value(update: &FieldUpdate) -> Value {
    match update {
        FieldUpdate::Status(s) => string_value(s.as_str()),
        // Firestore carries int64 as a decimal string.
        FieldUpdate::PageCount(n) => json!({ "integerValue": n.to_string() }),
        FieldUpdate::ErrorDetails(e) => string_value(e),
        FieldUpdate::WorkflowExecutionId(id) => string_value(id),
    }
}

fn new_document_fields(doc: &NewDocument) -> Value {
    json!({
        "fileHash": string_value(&doc.file_hash),
        "originalFilename": string_value(&doc.original_filename),
        "status": string_value(doc.status.as_str()),
        "createdAt": {
            "timestampValue": doc.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
        },
    })
}

/// Unwrap one typed Firestore value into plain JSON.
fn plain_value(typed: &Value) -> Value {
    let Some(obj) = typed.as_object() else {
        return Value::Null;
    };
    if let Some(v) = obj.get("stringValue").or_else(|| obj.get("timestampValue")) {
        return v.clone();
    }
    if let Some(v) = obj.get("integerValue") {
        return match v {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            other => other.clone(),
        };
    }
    if let Some(v) = obj.get("doubleValue").or_else(|| obj.get("booleanValue")) {
        return v.clone();
    }
    if let Some(fields) = obj
        .get("mapValue")
        .and_then(|m| m.get("fields"))
        .and_then(Value::as_object)
    {
        return Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), plain_value(v)))
                .collect(),
        );
    }
    Value::Null
}

fn decode_document(doc: FirestoreDocument) -> Result<DocumentRecord, LedgerError> {
    let id = doc
        .name
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| LedgerError::Decode(format!("document name '{}' has no id", doc.name)))?
        .to_string();
    let plain: Map<String, Value> = doc
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), plain_value(v)))
        .filter(|(_, v)| !v.is_null())
        .collect();
    let mut record: DocumentRecord = serde_json::from_value(Value::Object(plain))
        .map_err(|e| LedgerError::Decode(format!("document {id}: {e}")))?;
    record.id = id;
    Ok(record)
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, LedgerError> {
    response
        .json()
        .await
        .map_err(|e| LedgerError::Decode(e.to_string()))
}

#[async_trait]
impl DocumentLedger for FirestoreLedger {
    async fn create(&self, doc: &NewDocument) -> Result<String, LedgerError> {
        let body = json!({ "fields": new_document_fields(doc) });
        let response = self
            .send(self.client.post(self.collection_url()).json(&body), None)
            .await?;
        let created: FirestoreDocument = read_json(response).await?;
        let record = decode_document(created)?;
        debug!(document_id = %record.id, "Created ledger record");
        Ok(record.id)
    }

    async fn find_by_hash(&self, file_hash: &str) -> Result<Option<DocumentRecord>, LedgerError> {
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": self.collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": "fileHash" },
                        "op": "EQUAL",
                        "value": string_value(file_hash),
                    }
                },
                "limit": 1,
            }
        });
        let url = format!("{}:runQuery", self.documents_root());
        let response = self.send(self.client.post(url).json(&body), None).await?;
        let rows: Vec<QueryRow> = read_json(response).await?;
        rows.into_iter()
            .find_map(|row| row.document)
            .map(decode_document)
            .transpose()
    }

    async fn update(&self, id: &str, updates: &[FieldUpdate]) -> Result<(), LedgerError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut fields = Map::new();
        let mut query: Vec<(&str, &str)> = Vec::with_capacity(updates.len() + 1);
        for update in updates {
            fields.insert(update.field().to_string(), update_value(update));
            query.push(("updateMask.fieldPaths", update.field()));
        }
        query.push(("currentDocument.exists", "true"));

        let request = self
            .client
            .patch(self.document_url(id))
            .query(&query)
            .json(&json!({ "fields": fields }));
        self.send(request, Some(id)).await?;
        debug!(document_id = id, fields = updates.len(), "Updated ledger record");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<DocumentRecord, LedgerError> {
        let response = self
            .send(self.client.get(self.document_url(id)), Some(id))
            .await?;
        decode_document(read_json(response).await?)
    }
}
