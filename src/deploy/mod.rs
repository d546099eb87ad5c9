//! Hand-off to the external deployment CLI
//!
//! The CLI builds and runs the containerized web service; this module only
//! assembles its arguments, runs it and reads back the service id. Output is
//! passed through to the log unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::error::{DeployError, Result};

/// Identifier the deployment tool assigns to a realtime service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub String);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the deployment tool needs to build a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub service_name: String,
    pub model_path: PathBuf,
    pub scoring_entry: PathBuf,
    pub schema_path: PathBuf,
    pub runtime: String,
}

/// Parsed `service show` output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub id: ServiceId,
    pub state: Option<String>,
    pub scoring_url: Option<String>,
    /// Unparsed tool output
    pub raw: String,
}

/// Creates, inspects and calls deployed services
pub trait ServiceDeployer: Send + Sync {
    fn deploy(&self, request: &DeploymentRequest) -> Result<ServiceId>;
    fn status(&self, id: &ServiceId) -> Result<ServiceStatus>;
    fn invoke(&self, id: &ServiceId, payload: &Value) -> Result<Value>;
}

/// How the deployed container runs the scoring wrapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringEntry {
    /// Command the container starts
    pub command: Vec<String>,
    pub model_dir: PathBuf,
    pub schema_path: PathBuf,
    pub input_param: String,
}

impl ScoringEntry {
    pub fn new(model_dir: &Path, schema_path: &Path, input_param: &str) -> Self {
        Self {
            command: vec![env!("CARGO_PKG_NAME").to_string(), "serve".to_string()],
            model_dir: model_dir.to_path_buf(),
            schema_path: schema_path.to_path_buf(),
            input_param: input_param.to_string(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Account and cluster settings for the provisioning verbs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionSettings {
    pub cluster_name: String,
    pub location: String,
    pub resource_group: String,
    pub account_name: String,
}

/// One environment provisioning command, in the order they must run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    EnvSetup,
    AccountCreate,
    AccountSet,
    EnvSet,
}

impl ProvisionStep {
    pub const ALL: [ProvisionStep; 4] = [
        ProvisionStep::EnvSetup,
        ProvisionStep::AccountCreate,
        ProvisionStep::AccountSet,
        ProvisionStep::EnvSet,
    ];
}

/// [`ServiceDeployer`] that shells out to the deployment CLI
#[derive(Debug, Clone)]
pub struct CliDeployer {
    program: String,
}

impl Default for CliDeployer {
    fn default() -> Self {
        Self::new()
    }
}

impl CliDeployer {
    pub fn new() -> Self {
        Self {
            program: std::env::var("DEPLOY_CLI").unwrap_or_else(|_| "az".to_string()),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn create_args(request: &DeploymentRequest) -> Vec<String> {
        vec![
            "ml".into(),
            "service".into(),
            "create".into(),
            "realtime".into(),
            "-f".into(),
            request.scoring_entry.display().to_string(),
            "--model-file".into(),
            request.model_path.display().to_string(),
            "-s".into(),
            request.schema_path.display().to_string(),
            "-n".into(),
            request.service_name.clone(),
            "-r".into(),
            request.runtime.clone(),
        ]
    }

    pub fn show_args(id: &ServiceId) -> Vec<String> {
        ["ml", "service", "show", "realtime", "-i", id.0.as_str()].iter().map(|s| s.to_string()).collect()
    }

    pub fn run_args(id: &ServiceId, payload: &Value) -> Vec<String> {
        let mut args: Vec<String> = ["ml", "service", "run", "realtime", "-i", id.0.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push("-d".into());
        args.push(payload.to_string());
        args
    }

    pub fn provision_args(step: ProvisionStep, settings: &ProvisionSettings) -> Vec<String> {
        let s = settings;
        let args: Vec<&str> = match step {
            ProvisionStep::EnvSetup => vec![
                "ml", "env", "setup", "-n", s.cluster_name.as_str(), "-l", s.location.as_str(), "-g", s.resource_group.as_str(),
            ],
            ProvisionStep::AccountCreate => vec![
                "ml", "account", "modelmanagement", "create", "-n", s.account_name.as_str(), "-l", s.location.as_str(), "-g",
                s.resource_group.as_str(),
            ],
            ProvisionStep::AccountSet => vec![
                "ml", "account", "modelmanagement", "set", "-n", s.account_name.as_str(), "-g", s.resource_group.as_str(),
            ],
            ProvisionStep::EnvSet => vec!["ml", "env", "set", "-n", s.cluster_name.as_str(), "-g", s.resource_group.as_str()],
        };
        args.into_iter().map(str::to_string).collect()
    }

    /// Run every provisioning step in order, stopping at the first failure
    pub fn provision(&self, settings: &ProvisionSettings) -> Result<()> {
        for step in ProvisionStep::ALL {
            info!(?step, cluster = %settings.cluster_name, "Provisioning");
            self.execute(&Self::provision_args(step, settings))?;
        }
        Ok(())
    }

    fn execute(&self, args: &[String]) -> Result<String> {
        debug!(program = %self.program, args = ?args, "Running deployment CLI");
        let output = Command::new(&self.program).args(args).output().map_err(|e| {
            DeployError::DeploymentError(format!("Failed to start '{}': {}", self.program, e))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeployError::DeploymentError(format!(
                "'{} {}' exited with {}: {}",
                self.program,
                args.iter().take(4).cloned().collect::<Vec<_>>().join(" "),
                output.status,
                stderr.trim()
            )));
        }
        for line in stdout.lines() {
            info!(target: "kolosal_deploy::deploy::cli", "{}", line);
        }
        Ok(stdout)
    }
}

impl ServiceDeployer for CliDeployer {
    fn deploy(&self, request: &DeploymentRequest) -> Result<ServiceId> {
        for path in [&request.model_path, &request.scoring_entry, &request.schema_path] {
            if !path.exists() {
                return Err(DeployError::DeploymentError(format!("{} does not exist", path.display())));
            }
        }
        let output = self.execute(&Self::create_args(request))?;
        let id = parse_service_id(&output).ok_or_else(|| {
            DeployError::DeploymentError("Deployment CLI output contained no service id".to_string())
        })?;
        info!(service = %request.service_name, id = %id, "Service created");
        Ok(id)
    }

    fn status(&self, id: &ServiceId) -> Result<ServiceStatus> {
        let output = self.execute(&Self::show_args(id))?;
        Ok(parse_status(id, &output))
    }

    fn invoke(&self, id: &ServiceId, payload: &Value) -> Result<Value> {
        let output = self.execute(&Self::run_args(id, payload))?;
        let trimmed = output.trim();
        Ok(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())))
    }
}

/// Service id from `Service ID: <id>`, or from the `-i <id>` of a printed usage line
pub fn parse_service_id(output: &str) -> Option<ServiceId> {
    let labelled = output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let value = value.trim();
        (key.trim().eq_ignore_ascii_case("service id") && !value.is_empty()).then(|| value.to_string())
    });
    if let Some(id) = labelled {
        return Some(ServiceId(id));
    }

    output.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            if token == "-i" {
                return tokens.next().map(|id| ServiceId(id.trim_matches('"').to_string()));
            }
        }
        None
    })
}

fn parse_status(id: &ServiceId, output: &str) -> ServiceStatus {
    let field = |name: &str| {
        output.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    };
    ServiceStatus {
        id: id.clone(),
        state: field("state"),
        scoring_url: field("scoring url"),
        raw: output.to_string(),
    }
}
