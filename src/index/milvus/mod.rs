// Milvus / Zilliz Cloud REST v2 client

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use super::{EntryMetadata, IndexEntry, Metric, SearchHit, VectorIndex};
use crate::config::Secret;
use crate::providers::{FailureKind, HttpClient, ProviderError};

const HAS_COLLECTION: &str = "v2/vectordb/collections/has";
const CREATE_COLLECTION: &str = "v2/vectordb/collections/create";
const DROP_COLLECTION: &str = "v2/vectordb/collections/drop";
const UPSERT: &str = "v2/vectordb/entities/upsert";
const SEARCH: &str = "v2/vectordb/entities/search";
const QUERY: &str = "v2/vectordb/entities/query";

const ID_MAX_LENGTH: u32 = 512;
const INVALID_TOKEN_CODE: i64 = 80001;

/// Every v2 response wraps its payload in `{code, data, message}`
#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct HasCollection {
    has: bool,
}

#[derive(Debug, Deserialize)]
struct SearchRow {
    id: Value,
    distance: f32,
    #[serde(default)]
    text: String,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

pub struct MilvusIndex {
    http: HttpClient,
    collection: String,
}

impl MilvusIndex {
    #[inline]
    pub fn new(endpoint: &Url, api_key: Secret, collection: &str, timeout: Duration) -> Self {
        Self {
            http: HttpClient::new(endpoint, timeout, Some(api_key)),
            collection: collection.to_string(),
        }
    }

    fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<Option<T>, ProviderError> {
        let envelope: Envelope = self.http.post_json(path, body)?;
        if envelope.code != 0 {
            let message = envelope
                .message
                .unwrap_or_else(|| "no message".to_string());
            return Err(classify_code(envelope.code, &message));
        }
        if envelope.data.is_null() {
            return Ok(None);
        }
        serde_json::from_value(envelope.data)
            .map(Some)
            .map_err(|e| ProviderError::protocol(format!("Unexpected {} payload: {}", path, e)))
    }

    fn has_collection(&self) -> Result<bool, ProviderError> {
        Ok(self
            .call::<HasCollection>(HAS_COLLECTION, &json!({ "collectionName": self.collection }))?
            .is_some_and(|data| data.has))
    }

    fn create_collection(&self, dimension: usize, metric: Metric) -> Result<(), ProviderError> {
        info!(
            "Creating collection {} ({} dimensions, {})",
            self.collection, dimension, metric
        );
        self.call::<Value>(
            CREATE_COLLECTION,
            &json!({
                "collectionName": self.collection,
                "dimension": dimension,
                "metricType": metric_type(metric),
                "idType": "VarChar",
                "primaryFieldName": "id",
                "vectorFieldName": "vector",
                "autoID": false,
                "params": { "max_length": ID_MAX_LENGTH },
            }),
        )?;
        Ok(())
    }
}

/// Map a non-zero Milvus response code onto the retry classification
#[inline]
pub fn classify_code(code: i64, message: &str) -> ProviderError {
    let lowered = message.to_lowercase();
    let kind = if code == INVALID_TOKEN_CODE || lowered.contains("unauthorized") {
        FailureKind::Auth
    } else if lowered.contains("rate limit") {
        FailureKind::RateLimited
    } else if lowered.contains("not ready") || lowered.contains("unavailable") {
        FailureKind::Server
    } else {
        FailureKind::InvalidRequest
    };
    ProviderError::new(kind, format!("code {}: {}", code, message))
}

fn metric_type(metric: Metric) -> &'static str {
    match metric {
        Metric::Cosine => "COSINE",
        Metric::Dot => "IP",
    }
}

fn id_to_string(id: Value) -> String {
    match id {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl VectorIndex for MilvusIndex {
    #[inline]
    fn ensure_collection(&self, dimension: usize, metric: Metric) -> Result<(), ProviderError> {
        if self.has_collection()? {
            debug!("Collection {} already exists", self.collection);
            return Ok(());
        }
        self.create_collection(dimension, metric)
    }

    #[inline]
    fn recreate_collection(
        &self,
        dimension: usize,
        metric: Metric,
    ) -> Result<(), ProviderError> {
        if self.has_collection()? {
            info!("Dropping collection {}", self.collection);
            self.call::<Value>(
                DROP_COLLECTION,
                &json!({ "collectionName": self.collection }),
            )?;
        }
        self.create_collection(dimension, metric)
    }

    #[inline]
    fn upsert(&self, entries: &[IndexEntry]) -> Result<(), ProviderError> {
        if entries.is_empty() {
            return Ok(());
        }

        let rows: Vec<Value> = entries
            .iter()
            .map(|entry| {
                json!({
                    "id": entry.id,
                    "vector": entry.vector,
                    "text": entry.metadata.text,
                    "fields": entry.metadata.fields,
                })
            })
            .collect();

        self.call::<Value>(
            UPSERT,
            &json!({ "collectionName": self.collection, "data": rows }),
        )?;
        debug!("Upserted {} entries into {}", entries.len(), self.collection);
        Ok(())
    }

    #[inline]
    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        metric: Metric,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        let rows: Vec<SearchRow> = self
            .call(
                SEARCH,
                &json!({
                    "collectionName": self.collection,
                    "data": [vector],
                    "annsField": "vector",
                    "limit": top_k,
                    "outputFields": ["id", "text", "fields"],
                    "searchParams": { "metricType": metric_type(metric) },
                }),
            )?
            .unwrap_or_default();

        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .map(|row| SearchHit {
                id: id_to_string(row.id),
                score: row.distance,
                metadata: EntryMetadata {
                    text: row.text,
                    fields: row.fields,
                },
            })
            .collect();

        // The service already ranks, but ties are not ordered consistently
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(top_k);
        Ok(hits)
    }

    #[inline]
    fn count(&self) -> Result<usize, ProviderError> {
        let rows: Vec<BTreeMap<String, Value>> = self
            .call(
                QUERY,
                &json!({
                    "collectionName": self.collection,
                    "filter": "",
                    "outputFields": ["count(*)"],
                }),
            )?
            .unwrap_or_default();

        rows.first()
            .and_then(|row| row.get("count(*)"))
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| ProviderError::protocol("count(*) missing from query response"))
    }
}
