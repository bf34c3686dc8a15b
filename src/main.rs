use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use bdk_wallet::miniscript::{Descriptor, DescriptorPublicKey};
use bitcoin::Network;
use clap::Parser;
use uuid::Uuid;

use spark_pool_sync::sync::mock::MockCloudRegistry;
use spark_pool_sync::{
    Contribution, ContributionLedger, ContributionTimestamp, DescriptorDeriver, MemorySettings,
    NewPoolParams, PoolStore, PoolSyncEngine,
};

const DEMO_DESCRIPTOR: &str = "wpkh([73c5da0a/84h/1h/0h]tpubDC8msFGeGuwnKG9Upg7DM2b4DaRqg3CUZa5g8v2SRQ6K4NSkxUgd7HsL2XVWbVm39yBA4LAxysQAm397zwQSQoQgewGiYZqrA9DsP4zbQ1M/0/*)";

#[derive(Parser)]
#[command(author, version, about = "Pool sync engine walkthrough against an in-memory registry")]
struct Args {
    /// SQLite database path; omit for an in-memory store.
    #[arg(long)]
    db: Option<std::path::PathBuf>,

    #[arg(long, default_value = "demo-creator-uuid")]
    creator: String,

    #[arg(long, default_value = DEMO_DESCRIPTOR)]
    descriptor: String,

    #[arg(long, default_value = "testnet")]
    network: Network,

    #[arg(long, default_value = "Group trip fund")]
    title: String,

    /// Goal in the smallest currency unit.
    #[arg(long, default_value_t = 100_000)]
    goal: u64,
}

fn payment(pool_id: &str, name: &str, amount: u64, seconds: i64) -> Contribution {
    Contribution {
        contribution_id: Uuid::new_v4().to_string(),
        pool_id: pool_id.to_string(),
        contributor_name: name.to_string(),
        amount,
        created_at: ContributionTimestamp::new(seconds, 0),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let store = Arc::new(match &args.db {
        Some(path) => PoolStore::new(path),
        None => PoolStore::in_memory(),
    });
    let registry = Arc::new(MockCloudRegistry::new());
    let settings = Arc::new(MemorySettings::new());

    let descriptor = Descriptor::<DescriptorPublicKey>::from_str(&args.descriptor)?;
    let deriver = Arc::new(DescriptorDeriver::new(descriptor, args.network));

    let engine = PoolSyncEngine::new(
        store.clone(),
        registry.clone(),
        settings,
        deriver,
        args.creator.clone(),
    );

    println!("[MAIN] Restore check: {:?}", engine.restore_if_needed().await?);

    let pool = engine
        .create_pool(NewPoolParams {
            title: args.title.clone(),
            goal_amount: args.goal,
            denomination: "USD".to_string(),
        })
        .await?;
    println!("[MAIN] Created pool {}", pool.pool_id);
    println!("       receive address:  {}", pool.spark_address);
    println!("       derivation index: {}", pool.derivation_index);

    // Anonymous payers settle against the pool address; the registry folds
    // them into the server-side aggregates.
    let now = ContributionTimestamp::now().seconds;
    for (name, amount, offset) in [("anon", 2_500, 0), ("maya", 10_000, 30), ("anon", 1_500, 90)] {
        registry
            .push_contribution(payment(&pool.pool_id, name, amount, now + offset))
            .await;
    }

    let view = engine.refresh_pool(&pool.pool_id).await?;
    let aggregates = ContributionLedger::aggregates(&view.pool);
    println!(
        "[MAIN] After refresh: {} / {} {} from {} contributors",
        aggregates.current_amount,
        aggregates.goal_amount,
        view.pool.pool_denomination,
        aggregates.contributor_count
    );

    let ledger = ContributionLedger::new(store);
    println!("[MAIN] Recent activity:");
    for entry in ledger.recent_activity(&view.pool, "You", 5).await? {
        if entry.is_organizer {
            println!("       {} (organizer)", entry.name);
        } else {
            println!("       {} contributed {}", entry.name, entry.amount);
        }
    }

    let closed = engine
        .close_pool(&pool.pool_id, Some("demo-transfer-txid".into()))
        .await?;
    println!(
        "[MAIN] Closed pool at {} with transfer {}",
        closed.closed_at.unwrap_or_default(),
        closed.transfer_tx_id.as_deref().unwrap_or("-")
    );

    // A closed pool serves cached reads without touching the registry.
    let cached = engine.refresh_pool(&pool.pool_id).await?;
    println!(
        "[MAIN] Post-close refresh served {} cached contributions, status {:?}",
        cached.contributions.len(),
        cached.pool.status
    );

    Ok(())
}
