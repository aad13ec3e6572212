//! HTTP client wrapper for interacting with Qdrant.

use async_trait::async_trait;
use futures_util::{StreamExt, pin_mut};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

use crate::config::StoreSettings;
use crate::qdrant::{
    filters::build_filter,
    payload::build_points,
    scroller::stream_payloads,
    types::{CollectionInfoResponse, QdrantError, ScrollResponse},
};
use crate::retry::{RetryPolicy, with_retry};
use crate::store::{
    CollectionSchema, ColumnBatch, FieldKind, Predicate, Row, StoreError, VectorStore,
};

/// Lightweight HTTP client for Qdrant operations.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) retry: RetryPolicy,
}

impl QdrantService {
    /// Construct a client from store settings.
    pub fn new(settings: &StoreSettings, retry: RetryPolicy) -> Result<Self, QdrantError> {
        let client = Client::builder()
            .user_agent("rustyingest/0.1")
            .timeout(settings.timeout)
            .build()?;

        let base_url = normalize_base_url(&settings.url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = settings.api_key.is_some(),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key: settings
                .api_key
                .as_ref()
                .map(|secret| secret.expose().to_string()),
            retry,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .user_agent("rustyingest-test")
                .build()
                .expect("client"),
            base_url: base_url.to_string(),
            api_key: None,
            retry: RetryPolicy::none(),
        }
    }

    /// Create a collection only when it is missing, and check the width of an existing one.
    pub async fn create_collection_if_not_exists(
        &self,
        collection_name: &str,
        vector_size: usize,
    ) -> Result<(), StoreError> {
        match self.collection_vector_size(collection_name).await? {
            Some(Some(actual)) if actual != vector_size => Err(StoreError::SchemaMismatch {
                collection: collection_name.to_string(),
                expected: vector_size,
                actual,
            }),
            Some(_) => Ok(()),
            None => {
                tracing::info!(
                    collection = collection_name,
                    vector_size,
                    "Creating collection"
                );
                self.create_collection(collection_name, vector_size)
                    .await
                    .map_err(StoreError::from)
            }
        }
    }

    /// Create or update a collection with the specified vector size.
    pub async fn create_collection(
        &self,
        collection_name: &str,
        vector_size: usize,
    ) -> Result<(), QdrantError> {
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let path = format!("collections/{collection_name}");
        let response = self
            .send_with_retry("create_collection", || {
                self.request(Method::PUT, &path).json(&body)
            })
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Collection ensured/created");
        })
        .await
    }

    /// Ensure payload indexes exist for every keyword and integer field of the schema.
    pub async fn ensure_payload_indexes(&self, schema: &CollectionSchema) -> Result<(), QdrantError> {
        let collection_name = schema.name.as_str();
        for field in &schema.fields {
            let field_schema = match field.kind {
                FieldKind::Keyword => "keyword",
                FieldKind::Integer => "integer",
                FieldKind::Text | FieldKind::Vector => continue,
            };
            let body = json!({
                "field_name": field.name,
                "field_schema": field_schema,
            });

            let path = format!("collections/{collection_name}/index");
            let response = self
                .send_with_retry("create_index", || self.request(Method::PUT, &path).json(&body))
                .await?;

            if response.status().is_success() {
                tracing::debug!(
                    collection = collection_name,
                    field = field.name,
                    field_schema,
                    "Payload index ensured"
                );
            } else if response.status() == StatusCode::CONFLICT {
                tracing::debug!(
                    collection = collection_name,
                    field = field.name,
                    field_schema,
                    "Payload index already exists"
                );
            } else {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::warn!(collection = collection_name, field = field.name, field_schema, error = %error, "Failed to ensure payload index");
            }
        }

        Ok(())
    }

    /// Upsert points and wait until they are persisted.
    pub async fn upsert_points(
        &self,
        collection_name: &str,
        points: Vec<Value>,
    ) -> Result<usize, QdrantError> {
        if points.is_empty() {
            return Ok(0);
        }

        let point_count = points.len();
        let body = json!({ "points": points });
        let path = format!("collections/{collection_name}/points");
        let response = self
            .send_with_retry("upsert", || {
                self.request(Method::PUT, &path)
                    .query(&[("wait", true)])
                    .json(&body)
            })
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = collection_name,
                points = point_count,
                "Points upserted"
            );
        })
        .await?;

        Ok(point_count)
    }

    /// Delete every point whose payload matches `filter`.
    pub async fn delete_points(&self, collection_name: &str, filter: Value) -> Result<(), QdrantError> {
        let body = json!({ "filter": filter });
        let path = format!("collections/{collection_name}/points/delete");
        let response = self
            .send_with_retry("delete", || {
                self.request(Method::POST, &path)
                    .query(&[("wait", true)])
                    .json(&body)
            })
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Points deleted");
        })
        .await
    }

    /// Largest value of an integer payload field, read with one descending ordered scroll.
    ///
    /// Ordering needs the integer payload index created by [`Self::ensure_payload_indexes`].
    pub async fn max_payload_integer(
        &self,
        collection_name: &str,
        field: &str,
    ) -> Result<Option<u64>, QdrantError> {
        let body = json!({
            "limit": 1,
            "with_payload": [field],
            "with_vector": false,
            "order_by": { "key": field, "direction": "desc" },
        });
        let path = format!("collections/{collection_name}/points/scroll");
        let response = self
            .send_with_retry("scroll_max", || self.request(Method::POST, &path).json(&body))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = collection_name, field, error = %error, "Ordered scroll failed");
            return Err(error);
        }

        let ScrollResponse { result } = response.json().await?;
        Ok(result
            .points
            .into_iter()
            .filter_map(|point| point.payload)
            .find_map(|payload| payload.get(field).and_then(Value::as_u64)))
    }

    /// `None` when the collection is missing, `Some(None)` when it has no single unnamed vector.
    async fn collection_vector_size(
        &self,
        collection_name: &str,
    ) -> Result<Option<Option<usize>>, QdrantError> {
        let path = format!("collections/{collection_name}");
        let response = self
            .send_with_retry("collection_info", || self.request(Method::GET, &path))
            .await?;

        match response.status() {
            StatusCode::OK => {
                let info: CollectionInfoResponse = response.json().await?;
                Ok(Some(info.result.vector_size()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = collection_name, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    /// Send a request, retrying transport failures, throttling and server errors.
    ///
    /// Any other status is handed back to the caller for interpretation.
    pub(crate) async fn send_with_retry<F>(
        &self,
        what: &str,
        build: F,
    ) -> Result<reqwest::Response, QdrantError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let build = &build;
        with_retry(&self.retry, what, || async move {
            let response = build().send().await?;
            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                return Err(QdrantError::UnexpectedStatus { status, body });
            }
            Ok::<_, QdrantError>(response)
        })
        .await
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorStore for QdrantService {
    async fn load(&self, schema: &CollectionSchema) -> Result<(), StoreError> {
        self.create_collection_if_not_exists(&schema.name, schema.dimension)
            .await?;
        self.ensure_payload_indexes(schema).await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        predicate: &Predicate,
        fields: &[&str],
        limit: usize,
    ) -> Result<Vec<Row>, StoreError> {
        let stream = stream_payloads(self, collection, json!(fields), build_filter(predicate), limit);
        pin_mut!(stream);

        let mut rows = Vec::new();
        while rows.len() < limit {
            match stream.next().await {
                Some(payload) => rows.push(payload?),
                None => break,
            }
        }
        Ok(rows)
    }

    async fn query_all(
        &self,
        collection: &str,
        predicate: &Predicate,
        fields: &[&str],
        page_size: usize,
    ) -> Result<Vec<Row>, StoreError> {
        let stream = stream_payloads(
            self,
            collection,
            json!(fields),
            build_filter(predicate),
            page_size,
        );
        pin_mut!(stream);

        let mut rows = Vec::new();
        while let Some(payload) = stream.next().await {
            rows.push(payload?);
        }
        Ok(rows)
    }

    async fn max_integer(&self, collection: &str, field: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.max_payload_integer(collection, field).await?)
    }

    async fn insert(
        &self,
        schema: &CollectionSchema,
        batch: ColumnBatch,
    ) -> Result<usize, StoreError> {
        let points = build_points(schema, &batch)?;
        Ok(self.upsert_points(&schema.name, points).await?)
    }

    async fn delete(&self, collection: &str, predicate: &Predicate) -> Result<(), StoreError> {
        Ok(self.delete_points(collection, build_filter(predicate)).await?)
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
