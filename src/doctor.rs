//! `gba doctor`: configuration and environment diagnostics.

use anyhow::Result;

use crate::config::Config;
use crate::db;

/// One diagnostic line.
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub name: &'static str,
    pub status: String,
    pub healthy: bool,
}

/// Run every check without failing fast.
pub async fn run_checks(config: &Config) -> Vec<Check> {
    let mut checks = Vec::new();

    let db_status = match db::connect(config).await {
        Ok(pool) => {
            let ping = sqlx::query("SELECT 1").execute(&pool).await;
            pool.close().await;
            match ping {
                Ok(_) => ("OK".to_string(), true),
                Err(e) => (format!("ERROR ({})", e), false),
            }
        }
        Err(e) => (format!("UNREACHABLE ({})", e), false),
    };
    checks.push(Check {
        name: "database",
        status: db_status.0,
        healthy: db_status.1,
    });

    checks.push(Check {
        name: "content_bound",
        status: format!("{} bytes", config.content.max_bytes),
        healthy: true,
    });

    checks.push(provider_check(config, |var| std::env::var(var).is_ok()));

    checks
}

fn provider_check(config: &Config, key_present: impl Fn(&str) -> bool) -> Check {
    let provider = &config.provider;
    if !provider.is_enabled() {
        return Check {
            name: "provider",
            status: "DISABLED".to_string(),
            healthy: false,
        };
    }

    let key_var = provider.resolved_api_key_env();
    if key_present(&key_var) {
        Check {
            name: "provider",
            status: format!("OK ({} via {})", provider.model, provider.resolved_base_url()),
            healthy: true,
        }
    } else {
        Check {
            name: "provider",
            status: format!("MISSING KEY ({} not set)", key_var),
            healthy: false,
        }
    }
}

pub async fn run_doctor(config: &Config) -> Result<()> {
    println!("{:<16} {:<60} HEALTHY", "CHECK", "STATUS");
    for check in run_checks(config).await {
        println!("{:<16} {:<60} {}", check.name, check.status, check.healthy);
    }
    Ok(())
}
