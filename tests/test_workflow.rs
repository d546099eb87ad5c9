//! Integration test: Full workflow (ingest → train → persist → score → schema → deploy)

use kolosal_deploy::deploy::{DeploymentRequest, ServiceDeployer, ServiceId, ServiceStatus};
use kolosal_deploy::error::{DeployError, Result};
use kolosal_deploy::schema::SchemaDocument;
use kolosal_deploy::workflow::{DeploySettings, Workflow, WorkflowConfig};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

fn write_housing_csv(path: &Path) {
    let mut file = std::fs::File::create(path).unwrap();
    writeln!(file, "rooms,area,city,price").unwrap();
    for i in 0..40 {
        let rooms = 1 + i % 5;
        let area = 40.0 + i as f64 * 3.5;
        let city = if i % 3 == 0 { "bergen" } else { "oslo" };
        let price = 1000.0 * rooms as f64 + 12.0 * area + if city == "oslo" { 500.0 } else { 0.0 };
        writeln!(file, "{},{:.1},{},{:.1}", rooms, area, city, price).unwrap();
    }
}

/// Records every request instead of calling the real CLI
#[derive(Clone, Default)]
struct RecordingDeployer {
    requests: Arc<Mutex<Vec<DeploymentRequest>>>,
}

impl ServiceDeployer for RecordingDeployer {
    fn deploy(&self, request: &DeploymentRequest) -> Result<ServiceId> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(ServiceId(format!("{}.local-1", request.service_name)))
    }

    fn status(&self, id: &ServiceId) -> Result<ServiceStatus> {
        Ok(ServiceStatus {
            id: id.clone(),
            state: Some("Succeeded".to_string()),
            scoring_url: None,
            raw: String::new(),
        })
    }

    fn invoke(&self, _id: &ServiceId, _payload: &Value) -> Result<Value> {
        Ok(Value::Null)
    }
}

fn config_in(dir: &Path) -> WorkflowConfig {
    let data = dir.join("housing.csv");
    write_housing_csv(&data);
    let mut config = WorkflowConfig::new(&data, "price");
    config.model_dir = dir.join("model");
    config.schema_path = dir.join("schema.json");
    config
}

#[test]
fn test_full_workflow_without_deployment() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    let report = Workflow::new(config.clone()).run().unwrap();

    assert_eq!(report.rows, 40);
    assert_eq!(report.columns, 4);
    assert!(report.metrics.r2 > 0.8, "r2 = {}", report.metrics.r2);
    assert!(!report.sample_failed, "sample failed: {}", report.sample_response);
    assert_eq!(report.sample_response.split(',').count(), 3);
    assert!(report.service_id.is_none());

    assert!(config.model_dir.join("pipeline.json").is_file());
    let schema = SchemaDocument::read(&config.schema_path).unwrap();
    let input = schema.parameter("input_df").unwrap();
    assert_eq!(input.internal.fields.len(), 3);
    assert_eq!(input.swagger.items.properties.len(), 3);
    assert_eq!(input.swagger.example.len(), 3);
    assert_eq!(input.swagger.items.properties["rooms"].format.as_deref(), Some("int32"));
    assert_eq!(input.swagger.items.properties["area"].format.as_deref(), Some("double"));
}

#[test]
fn test_workflow_hands_artifacts_to_deployer() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    let mut settings = DeploySettings::new("housing");
    settings.scoring_entry = dir.path().join("score.json");
    config.deployment = Some(settings);

    let deployer = RecordingDeployer::default();
    let report = Workflow::new(config.clone())
        .with_deployer(Box::new(deployer.clone()))
        .run()
        .unwrap();

    assert_eq!(report.service_id, Some(ServiceId("housing.local-1".to_string())));

    let requests = deployer.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model_path, config.model_dir);
    assert_eq!(requests[0].schema_path, config.schema_path);
    assert!(requests[0].scoring_entry.is_file());
}

#[test]
fn test_rerun_overwrites_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    Workflow::new(config.clone()).run().unwrap();

    std::fs::write(config.model_dir.join("leftover.bin"), b"stale").unwrap();
    Workflow::new(config.clone()).run().unwrap();
    assert!(!config.model_dir.join("leftover.bin").exists());
}

#[test]
fn test_unknown_target_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.pipeline.formula = "value ~ .".to_string();

    let result = Workflow::new(config).run();
    assert!(matches!(result, Err(DeployError::FeatureNotFound(c)) if c == "value"));
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let path = dir.path().join("workflow.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    assert_eq!(WorkflowConfig::from_file(&path).unwrap(), config);
}

#[test]
fn test_nan_target_fails_in_training_stage() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("broken.csv");
    let mut file = std::fs::File::create(&data).unwrap();
    writeln!(file, "x,y").unwrap();
    for i in 0..10 {
        if i == 4 {
            writeln!(file, "{},NaN", i).unwrap();
        } else {
            writeln!(file, "{},{}", i, i * 2).unwrap();
        }
    }
    drop(file);

    let mut config = WorkflowConfig::new(&data, "y");
    config.model_dir = dir.path().join("model");
    config.schema_path = dir.path().join("schema.json");

    let workflow = Workflow::new(config.clone());
    let df = workflow.ingest().unwrap();
    assert!(matches!(workflow.train(&df), Err(DeployError::InvalidInput(_))));

    assert!(matches!(workflow.run(), Err(DeployError::InvalidInput(_))));
    assert!(!config.model_dir.exists());
}
