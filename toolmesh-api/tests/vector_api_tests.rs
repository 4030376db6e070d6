//! Vector API end-to-end tests: store, search, per-model variants, and
//! tenant model selection.

mod support;

use axum::http::StatusCode;
use serde_json::json;
use support::{authed, authed_empty, send, test_app};

#[tokio::test]
async fn test_store_and_search_round_trip() {
    let (app, _) = test_app().await;

    for (idx, vector) in [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]].iter().enumerate() {
        let (status, _) = send(
            &app,
            authed(
                "POST",
                "/api/v1/vectors/store",
                json!({
                    "context_id": "ctx-1",
                    "content_index": idx,
                    "text": format!("chunk {idx}"),
                    "vector": vector,
                    "vector_dimensions": 3,
                    "model_id": "m",
                    "created_at": "2026-01-01T00:00:00Z"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    // Cosine >= 0.5 keeps only the parallel vector, ordered by similarity.
    let (status, body) = send(
        &app,
        authed(
            "POST",
            "/api/v1/vectors/search",
            json!({
                "query_vector": [1.0, 0.0, 0.0],
                "context_id": "ctx-1",
                "model_id": "m",
                "limit": 5,
                "similarity_threshold": 0.5
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["content_index"], 0);
    assert!(body["results"][0]["similarity"].as_f64().unwrap() >= 0.5);
}

#[tokio::test]
async fn test_store_rejects_dimension_mismatch() {
    let (app, _) = test_app().await;
    let (status, body) = send(
        &app,
        authed(
            "POST",
            "/api/v1/vectors/store",
            json!({
                "context_id": "ctx-1",
                "content_index": 0,
                "text": "bad",
                "vector": [1.0, 0.0],
                "vector_dimensions": 3,
                "model_id": "m",
                "created_at": "2026-01-01T00:00:00Z"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION");
}

#[tokio::test]
async fn test_get_and_delete_by_model() {
    let (app, _) = test_app().await;
    for (model, vector) in [("a", vec![1.0]), ("b", vec![1.0, 0.0])] {
        let dimensions = vector.len();
        send(
            &app,
            authed(
                "POST",
                "/api/v1/vectors/store",
                json!({
                    "context_id": "ctx-1",
                    "content_index": 0,
                    "text": "chunk",
                    "vector": vector,
                    "vector_dimensions": dimensions,
                    "model_id": model,
                    "created_at": "2026-01-01T00:00:00Z"
                }),
            ),
        )
        .await;
    }

    let (status, body) = send(
        &app,
        authed_empty("GET", "/api/v1/vectors/context/ctx-1/model/a"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, body) = send(
        &app,
        authed_empty("DELETE", "/api/v1/vectors/context/ctx-1/model/a"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);

    let (_, body) = send(&app, authed_empty("GET", "/api/v1/vectors/context/ctx-1")).await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_list_supported_models() {
    let (app, _) = test_app().await;
    let (status, body) = send(&app, authed_empty("GET", "/api/v1/vectors/models")).await;
    assert_eq!(status, StatusCode::OK);
    let models = body["models"].as_array().unwrap();
    assert!(!models.is_empty());
    assert!(models
        .iter()
        .any(|m| m["model_id"] == "text-embedding-3-small"));
}

#[tokio::test]
async fn test_tenant_roster_and_model_selection() {
    let (app, _) = test_app().await;

    let (status, _) = send(
        &app,
        authed(
            "PUT",
            "/api/v1/tenants/t1/models",
            json!({
                "tenant_id": "t1",
                "models": [
                    { "model_id": "small", "enabled": true, "is_default": true, "priority": 1 },
                    { "model_id": "large", "enabled": true, "priority": 9 }
                ],
                "agent_preferences": { "a1": "large" }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Requested model wins.
    let (_, body) = send(
        &app,
        authed(
            "POST",
            "/api/v1/vectors/models/select",
            json!({ "tenant_id": "t1", "model_id": "large" }),
        ),
    )
    .await;
    assert_eq!(body["model_id"], "large");

    // Agent preference next.
    let (_, body) = send(
        &app,
        authed(
            "POST",
            "/api/v1/vectors/models/select",
            json!({ "tenant_id": "t1", "agent_id": "a1" }),
        ),
    )
    .await;
    assert_eq!(body["model_id"], "large");

    // Tenant default otherwise.
    let (_, body) = send(
        &app,
        authed(
            "POST",
            "/api/v1/vectors/models/select",
            json!({ "tenant_id": "t1" }),
        ),
    )
    .await;
    assert_eq!(body["model_id"], "small");
}

#[tokio::test]
async fn test_selection_for_unknown_tenant_404() {
    let (app, _) = test_app().await;
    let (status, body) = send(
        &app,
        authed(
            "POST",
            "/api/v1/vectors/models/select",
            json!({ "tenant_id": "ghost" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_two_defaults_rejected() {
    let (app, _) = test_app().await;
    let (status, body) = send(
        &app,
        authed(
            "PUT",
            "/api/v1/tenants/t1/models",
            json!({
                "tenant_id": "t1",
                "models": [
                    { "model_id": "a", "enabled": true, "is_default": true },
                    { "model_id": "b", "enabled": true, "is_default": true }
                ]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION");
}
