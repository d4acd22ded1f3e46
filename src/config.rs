//! Configuration for abell-provision
//!
//! CLI arguments and environment variable handling using clap. Passwords are
//! not flags; they come from the secret source selected here.

use std::path::PathBuf;

use clap::Parser;

use crate::provision::PlanSettings;
use crate::secrets::{EnvSecretSource, FileSecretSource, SecretSource};

/// Provision the Abell asset database on MongoDB
#[derive(Parser, Debug, Clone)]
#[command(name = "abell-provision")]
#[command(about = "Create Abell's users, collections and indexes on a MongoDB deployment")]
pub struct Args {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://127.0.0.1:27017")]
    pub mongodb_uri: String,

    /// Database holding the admin user
    #[arg(long, env = "ADMIN_DB", default_value = "admin")]
    pub admin_db: String,

    /// Admin username
    #[arg(long, env = "ADMIN_USER", default_value = "admin")]
    pub admin_user: String,

    /// Application database
    #[arg(long, env = "MONGO_DBNAME", default_value = "abell")]
    pub app_db: String,

    /// Application username
    #[arg(long, env = "MONGO_USERNAME", default_value = "abell")]
    pub app_user: String,

    /// Directory with one file per secret (`admin_password`, `app_password`)
    /// If unset, passwords are read from ADMIN_PASSWORD and MONGO_PASSWORD
    #[arg(long, env = "SECRETS_DIR")]
    pub secrets_dir: Option<PathBuf>,

    /// Server selection and connect timeout in milliseconds
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value = "3000")]
    pub connect_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Rehearse the plan against an in-memory deployment without connecting
    #[arg(long, conflicts_with = "verify")]
    pub dry_run: bool,

    /// Only check that the deployment is provisioned
    #[arg(long)]
    pub verify: bool,
}

impl Args {
    /// Names used to build the plan
    pub fn plan_settings(&self) -> PlanSettings {
        PlanSettings {
            admin_db: self.admin_db.clone(),
            admin_user: self.admin_user.clone(),
            app_db: self.app_db.clone(),
            app_user: self.app_user.clone(),
        }
    }

    /// Secret source selected by the flags
    pub fn secret_source(&self) -> Box<dyn SecretSource> {
        match &self.secrets_dir {
            Some(dir) => Box::new(FileSecretSource::new(dir)),
            None => Box::new(EnvSecretSource::new()),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.mongodb_uri.starts_with("mongodb://")
            && !self.mongodb_uri.starts_with("mongodb+srv://")
        {
            return Err("MONGODB_URI must start with mongodb:// or mongodb+srv://".to_string());
        }

        if self.connect_timeout_ms == 0 {
            return Err("CONNECT_TIMEOUT_MS must be greater than zero".to_string());
        }

        if let Some(dir) = &self.secrets_dir {
            if !dir.is_dir() {
                return Err(format!("SECRETS_DIR {} is not a directory", dir.display()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["abell-provision"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_plan_settings_from_flags() {
        let args = parse(&["--app-db", "inventory", "--admin-user", "root"]);
        let settings = args.plan_settings();

        assert_eq!(settings.app_db, "inventory");
        assert_eq!(settings.admin_user, "root");
    }

    #[test]
    fn test_validate() {
        let args = parse(&["--mongodb-uri", "mongodb://db:27017"]);
        assert!(args.validate().is_ok());

        let args = parse(&["--mongodb-uri", "http://db"]);
        assert!(args.validate().is_err());

        let args = parse(&["--mongodb-uri", "mongodb://db", "--connect-timeout-ms", "0"]);
        assert!(args.validate().is_err());

        let args = parse(&["--mongodb-uri", "mongodb://db", "--secrets-dir", "/nonexistent/secrets"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_dry_run_conflicts_with_verify() {
        let result = Args::try_parse_from(["abell-provision", "--dry-run", "--verify"]);
        assert!(result.is_err());
    }
}
