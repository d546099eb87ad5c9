//! Kolosal Deploy - Main Entry Point

use clap::Parser;
use kolosal_deploy::cli::{
    cmd_deploy, cmd_invoke, cmd_provision, cmd_run, cmd_schema, cmd_score, cmd_serve, cmd_status, cmd_train, Cli,
    Commands,
};
use kolosal_deploy::deploy::ProvisionSettings;
use kolosal_deploy::training::GradientBoostingConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kolosal_deploy=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, data, target, formula, model_dir, schema, deploy_as } => {
            tokio::task::block_in_place(|| {
                cmd_run(config.as_deref(), data, target, formula, model_dir, schema, deploy_as)
            })?;
        }
        Commands::Train { data, target, formula, model_dir, n_estimators, max_depth, learning_rate } => {
            let booster = GradientBoostingConfig {
                n_estimators,
                max_depth,
                learning_rate,
                ..Default::default()
            };
            tokio::task::block_in_place(|| cmd_train(&data, &target, formula, &model_dir, booster))?;
        }
        Commands::Schema { data, target, output, input_param, rows } => {
            cmd_schema(&data, &target, &output, &input_param, rows)?;
        }
        Commands::Score { model_dir, input } => {
            cmd_score(&model_dir, &input)?;
        }
        Commands::Serve { port, host, model_dir, schema, input_param, response_mode } => {
            cmd_serve(host, port, model_dir, schema, input_param, response_mode).await?;
        }
        Commands::Deploy { name, model_dir, schema, scoring_entry, input_param, runtime, program } => {
            cmd_deploy(&name, &model_dir, &schema, &scoring_entry, &input_param, &runtime, program)?;
        }
        Commands::Status { id, program } => {
            cmd_status(&id, program)?;
        }
        Commands::Invoke { id, payload, program } => {
            cmd_invoke(&id, &payload, program)?;
        }
        Commands::Provision { cluster, location, resource_group, account, program } => {
            let settings = ProvisionSettings {
                cluster_name: cluster,
                location,
                resource_group,
                account_name: account,
            };
            cmd_provision(&settings, program)?;
        }
    }

    Ok(())
}
