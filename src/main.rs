//! abell-provision - bootstrap the Abell asset database

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use abell_provision::{
    config::Args,
    db::{mongo::redact_uri, InMemoryBackend, MongoBackend},
    provision::{verify_provisioned, ProvisionPlan, Provisioner},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(2);
    }

    info!("======================================");
    info!("  Abell database provisioning");
    info!("======================================");
    info!("MongoDB: {}", redact_uri(&args.mongodb_uri));
    info!("Admin: {}@{}", args.admin_user, args.admin_db);
    info!("Application: {}@{}", args.app_user, args.app_db);
    info!(
        "Secrets: {}",
        args.secrets_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "environment".to_string())
    );
    info!("======================================");

    let secrets = args.secret_source();
    let plan = ProvisionPlan::new(args.plan_settings(), secrets.as_ref())?;

    if args.dry_run {
        return rehearse(&plan).await;
    }

    let backend = MongoBackend::connect(&args.mongodb_uri, args.connect_timeout_ms).await?;
    let provisioner = Provisioner::new(Arc::new(backend));

    if args.verify {
        let admin = provisioner.authenticate_admin(&plan).await?;
        let report = verify_provisioned(&admin, &plan).await?;
        if args.log_json {
            println!("{}", serde_json::to_string(&report)?);
        }
        report.into_result()?;
        info!("Deployment is provisioned");
        return Ok(());
    }

    match provisioner.run(&plan).await {
        Ok(report) => {
            for step in &report.steps {
                info!("{:<13} {}", format!("{:?}", step.outcome), step.step);
            }
            if args.log_json {
                println!("{}", serde_json::to_string(&report)?);
            }
            Ok(())
        }
        Err(e) => {
            error!(
                step = e.step().unwrap_or("unknown"),
                "Provisioning halted: {}",
                e.root()
            );
            Err(e.into())
        }
    }
}

/// Run the plan against an empty in-memory deployment and print the outcomes
async fn rehearse(plan: &ProvisionPlan) -> anyhow::Result<()> {
    info!("Dry run: rehearsing {} step(s) in memory", plan.steps().len());

    let report = Provisioner::new(Arc::new(InMemoryBackend::new()))
        .run(plan)
        .await?;
    let output = serde_json::json!({
        "plan": plan.summary(),
        "rehearsal": report,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("abell_provision={},info", args.log_level).into());

    let (plain, json) = if args.log_json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .init();
}
