//! Integration test: Scoring service endpoints

use axum::body::Body;
use axum::http::{Request, StatusCode};
use kolosal_deploy::data::sample_input;
use kolosal_deploy::persistence::{DirectoryStore, PipelineStore};
use kolosal_deploy::schema::generate_schema;
use kolosal_deploy::scoring::{ResponseMode, ScoringContext};
use kolosal_deploy::server::{create_router, AppState, ServiceConfig};
use kolosal_deploy::training::{GbtPipelineEstimator, PipelineEstimator, PipelineSpec};
use polars::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn training_frame() -> DataFrame {
    let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
    let size: Vec<i32> = (0..30).map(|i| i % 4).collect();
    let y: Vec<f64> = x.iter().zip(&size).map(|(a, b)| 3.0 * a + *b as f64).collect();
    df!("x" => x, "size" => size, "y" => y).unwrap()
}

fn test_app(mode: ResponseMode) -> (axum::Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let df = training_frame();
    let pipeline = GbtPipelineEstimator::new(PipelineSpec::for_target("y")).fit(&df).unwrap();
    let model_dir = dir.path().join("model");
    DirectoryStore::new().save(&pipeline, &model_dir).unwrap();

    let config = ServiceConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        model_dir: model_dir.clone(),
        schema_path: None,
        input_param: "input_df".to_string(),
        response_mode: mode,
        title: "test service".to_string(),
    };
    let scoring = ScoringContext::init(&DirectoryStore::new(), &model_dir).unwrap();
    let schema = generate_schema("input_df", &sample_input(&df, "y", 3).unwrap()).unwrap();
    let state = Arc::new(AppState::new(config, scoring, Some(schema)));
    (create_router(state), dir)
}

async fn post_score(app: axum::Router, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/score")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 64).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _dir) = test_app(ResponseMode::Compatible);
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 64).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["input_columns"], json!(["x", "size"]));
}

#[tokio::test]
async fn test_score_three_rows() {
    let (app, _dir) = test_app(ResponseMode::Compatible);
    let rows = json!({"input_df": [
        {"x": 1.0, "size": 1},
        {"x": 10.0, "size": 2},
        {"x": 20.0, "size": 3}
    ]});
    let (status, body) = post_score(app, rows).await;
    assert_eq!(status, StatusCode::OK);

    let result = body["result"].as_str().unwrap();
    let values: Vec<f64> = result.split(',').map(|t| t.parse().unwrap()).collect();
    assert_eq!(values.len(), 3);
    assert!(values[0] < values[1] && values[1] < values[2]);
}

#[tokio::test]
async fn test_missing_feature_is_string_result() {
    let (app, _dir) = test_app(ResponseMode::Compatible);
    let (status, body) = post_score(app, json!({"input_df": [{"x": 1.0}]})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["result"].as_str().unwrap().contains("size"));
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_missing_feature_discriminated() {
    let (app, _dir) = test_app(ResponseMode::Discriminated);
    let (status, body) = post_score(app, json!({"input_df": [{"x": 1.0}]})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["result"].is_null());
    assert!(body["error"].as_str().unwrap().contains("size"));
}

#[tokio::test]
async fn test_nested_row_value_is_scoring_failure() {
    let (app, _dir) = test_app(ResponseMode::Discriminated);
    let (status, body) = post_score(app, json!({"input_df": [{"x": [1.0, 2.0]}]})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["result"].is_null());
    assert!(body["error"].as_str().unwrap().contains("nested"));
}

#[tokio::test]
async fn test_missing_input_param_is_bad_request() {
    let (app, _dir) = test_app(ResponseMode::Compatible);
    let (status, body) = post_score(app, json!({"rows": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], true);
}

#[tokio::test]
async fn test_non_array_input_is_bad_request() {
    let (app, _dir) = test_app(ResponseMode::Compatible);
    let (status, _) = post_score(app, json!({"input_df": {"x": 1.0}})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_swagger_document() {
    let (app, _dir) = test_app(ResponseMode::Compatible);
    let response = app
        .oneshot(Request::builder().uri("/swagger.json").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 64).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["info"]["title"], "test service");
    let param = &body["paths"]["/score"]["post"]["requestBody"]["content"]["application/json"]["schema"]["properties"]
        ["input_df"];
    assert_eq!(param["example"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (app, _dir) = test_app(ResponseMode::Compatible);
    let response = app
        .oneshot(Request::builder().uri("/predict").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
