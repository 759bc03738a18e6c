//! `swarmgate validate`: boundary validation of a request file.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::services::tier_validator::{
    validate_execution_context, validate_resource_allocation, TierInputValidator,
};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// JSON file holding a `{context, input, allocation}` request
    pub file: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct ValidationOutput {
    pub file: String,
    pub valid: bool,
    pub context_valid: bool,
    pub allocation_valid: bool,
    /// Tier the input was discriminated as, if any
    pub tier: Option<String>,
    pub execution_id: Option<String>,
    pub rejection: Option<String>,
}

impl CommandOutput for ValidationOutput {
    fn to_human(&self) -> String {
        let mark = |ok: bool| {
            if ok {
                console::style("ok").green().to_string()
            } else {
                console::style("invalid").red().to_string()
            }
        };
        let mut lines = vec![format!("Request: {}", self.file)];
        lines.push(format!("  Context:     {}", mark(self.context_valid)));
        lines.push(format!("  Allocation:  {}", mark(self.allocation_valid)));
        lines.push(format!(
            "  Input tier:  {}",
            self.tier.as_deref().unwrap_or("unrecognized")
        ));
        if let Some(id) = &self.execution_id {
            lines.push(format!("  Execution:   {id}"));
        }
        if self.valid {
            lines.push(console::style("Request is valid.").green().bold().to_string());
        } else if let Some(reason) = &self.rejection {
            lines.push(format!("{} {reason}", console::style("Rejected:").red().bold()));
        }
        lines.join("\n")
    }
}

/// Validate a parsed request without touching the filesystem.
pub fn validate_value(validator: &TierInputValidator, file: &str, request: &Value) -> ValidationOutput {
    let field = |key: &str| request.get(key).unwrap_or(&Value::Null);
    let context_valid = validate_execution_context(field("context"));
    let allocation_valid = validate_resource_allocation(field("allocation"));
    let tier = validator
        .discriminate(field("input"))
        .map(|input| input.kind().to_string());

    match validator.validate_request(request) {
        Ok(validated) => ValidationOutput {
            file: file.to_string(),
            valid: true,
            context_valid,
            allocation_valid,
            tier,
            execution_id: Some(validated.context.execution_id),
            rejection: None,
        },
        Err(rejection) => ValidationOutput {
            file: file.to_string(),
            valid: false,
            context_valid,
            allocation_valid,
            tier,
            execution_id: None,
            rejection: Some(rejection.to_string()),
        },
    }
}

pub async fn execute(args: ValidateArgs, config: &Config, json_mode: bool) -> Result<()> {
    let raw = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let request: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", args.file.display()))?;

    let validator = TierInputValidator::new(config.dispatch.tier_order.clone());
    let report = validate_value(&validator, &args.file.display().to_string(), &request);
    output(&report, json_mode);

    if report.valid {
        Ok(())
    } else {
        anyhow::bail!("request failed boundary validation")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(input: Value) -> Value {
        json!({
            "context": {
                "executionId": "exec-1",
                "swarmId": "swarm-1",
                "userId": "user-1",
                "correlationId": "corr-1",
                "timestamp": "2026-01-01T00:00:00Z"
            },
            "input": input,
            "allocation": {"maxCredits": "5", "maxDurationMs": 1000, "maxMemoryMB": 128}
        })
    }

    #[test]
    fn test_valid_step_request() {
        let report = validate_value(
            &TierInputValidator::default(),
            "req.json",
            &request(json!({
                "stepId": "s1", "stepType": "transform", "strategy": "deterministic", "parameters": {}
            })),
        );
        assert!(report.valid);
        assert_eq!(report.tier.as_deref(), Some("step"));
        assert_eq!(report.execution_id.as_deref(), Some("exec-1"));
    }

    #[test]
    fn test_unrecognized_input_is_reported() {
        let report = validate_value(
            &TierInputValidator::default(),
            "req.json",
            &request(json!({"hello": "world"})),
        );
        assert!(!report.valid);
        assert!(report.context_valid);
        assert!(report.allocation_valid);
        assert!(report.tier.is_none());
        assert!(report.rejection.is_some());
    }

    #[tokio::test]
    async fn test_execute_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        std::fs::write(
            &path,
            request(json!({"goal": "coordinate"})).to_string(),
        )
        .unwrap();

        let args = ValidateArgs { file: path };
        assert!(execute(args, &Config::default(), true).await.is_ok());
    }
}
