use gestflow_db::{Gateway, SeedResult, TenantSeed};

use crate::commands::{open_migrated, prepare, CommandResult, EXIT_SEED};

/// Migrates, then bootstraps the first tenant (and the demo catalog when `demo` is set).
pub fn run(demo: bool) -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let gateway = Gateway::new(pool.clone());
        let seeded = TenantSeed::load(&gateway, &config.seed, demo)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), EXIT_SEED));
        pool.close().await;
        seeded.map(|seeded| summarize(&seeded))
    });

    CommandResult::from_step("seed", result)
}

fn summarize(result: &SeedResult) -> String {
    let created = |flag: bool| if flag { "created" } else { "already present" };
    let mut parts = vec![
        format!("company {} (id {}): {}", result.company_name, result.company_id, created(result.company_created)),
        format!("owner: {}", if result.owner_created { "created" } else { "unchanged" }),
    ];
    if result.demo_items_created > 0 || result.demo_customers_created > 0 {
        parts.push(format!(
            "demo data: {} items, {} customers",
            result.demo_items_created, result.demo_customers_created
        ));
    }
    parts.join("; ")
}
