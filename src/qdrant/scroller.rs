//! Streaming helper for iterating Qdrant scroll pages without manual loops.

use async_stream::try_stream;
use futures_core::Stream;
use reqwest::Method;
use serde_json::{Map, Value, json};

use super::client::QdrantService;
use super::types::{QdrantError, ScrollResponse};

const DEFAULT_SCROLL_LIMIT: usize = 512;

/// Stream payloads of a collection matching `filter`, one scroll page at a time.
pub fn stream_payloads<'a>(
    service: &'a QdrantService,
    collection: &'a str,
    with_payload: Value,
    filter: Value,
    page_size: usize,
) -> impl Stream<Item = Result<Map<String, Value>, QdrantError>> + 'a {
    try_stream! {
        let mut offset: Option<Value> = None;
        let page_size = page_size.clamp(1, DEFAULT_SCROLL_LIMIT);

        loop {
            let body = json!({
                "with_payload": with_payload.clone(),
                "with_vector": false,
                "limit": page_size,
                "filter": filter.clone(),
                "offset": offset.clone().unwrap_or(Value::Null),
            });

            let path = format!("collections/{collection}/points/scroll");
            let response = service
                .send_with_retry("scroll", || service.request(Method::POST, &path).json(&body))
                .await?;

            let status = response.status();
            if status.is_success() {
                let ScrollResponse { result } = response.json().await?;
                for point in result.points {
                    if let Some(payload) = point.payload {
                        yield payload;
                    }
                }

                match result.next_page_offset {
                    Some(next) if !next.is_null() => offset = Some(next),
                    _ => break,
                }
            } else {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(collection = collection, status = %status, "Failed to scroll payloads");
                Err(QdrantError::UnexpectedStatus { status, body })?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{pin_mut, stream::StreamExt};
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn stream_payloads_collects_multiple_pages() {
        let server = MockServer::start_async().await;
        let service = QdrantService::for_tests(&server.base_url());

        let first = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/chunks/points/scroll")
                    .body_contains("\"offset\":null");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [
                            { "id": 0, "payload": { "chunk_id": 0 } }
                        ],
                        "next_page_offset": 1
                    }
                }));
            })
            .await;

        let second = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/chunks/points/scroll")
                    .body_contains("\"offset\":1");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [
                            { "id": 1, "payload": { "chunk_id": 1 } }
                        ],
                        "next_page_offset": null
                    }
                }));
            })
            .await;

        let stream = stream_payloads(
            &service,
            "chunks",
            json!(["chunk_id"]),
            json!({ "must": [] }),
            100,
        );
        pin_mut!(stream);
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item.expect("payload"));
        }

        first.assert();
        second.assert();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].get("chunk_id").and_then(Value::as_u64), Some(0));
        assert_eq!(items[1].get("chunk_id").and_then(Value::as_u64), Some(1));
    }

    #[tokio::test]
    async fn failed_page_surfaces_status() {
        let server = MockServer::start_async().await;
        let service = QdrantService::for_tests(&server.base_url());

        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/chunks/points/scroll");
                then.status(400).body("bad filter");
            })
            .await;

        let stream = stream_payloads(&service, "chunks", json!(true), json!({ "must": [] }), 10);
        pin_mut!(stream);
        let first = stream.next().await.expect("one item");
        assert!(matches!(first, Err(QdrantError::UnexpectedStatus { .. })));
    }
}
