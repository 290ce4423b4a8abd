use anyhow::{bail, Result};
use dao_analysis::env::ENV_CONFIG;
use dao_analysis::paginate::{fetch_all, CheckpointConfig, FetchOptions, FetchStatus};
use dao_analysis::snapshot::SnapshotGraphql;
use tracing::info;

const SPACES_QUERY: &str = r#"
query Spaces($first: Int!, $skip: Int!) {
  spaces(first: $first, skip: $skip) {
    id
    name
    about
    network
    symbol
    members
    admins
    filters {
      minScore
      onlyMembers
    }
  }
}
"#;

#[tokio::main]
async fn main() -> Result<()> {
    dao_analysis::log::init();

    let transport = SnapshotGraphql::new();
    let options = FetchOptions {
        checkpoint: Some(CheckpointConfig {
            data_dir: ENV_CONFIG.data_dir.clone(),
            ..CheckpointConfig::new("spaces.json")
        }),
        ..FetchOptions::default()
    };

    let outcome = fetch_all(&transport, SPACES_QUERY, "spaces", options).await?;
    match outcome.status {
        FetchStatus::Exhausted => {
            info!(total = outcome.records.len(), "fetched all spaces");
            Ok(())
        }
        FetchStatus::LimitReached => {
            info!(total = outcome.records.len(), "stopped at iteration limit");
            Ok(())
        }
        FetchStatus::Failed(err) => {
            bail!(
                "spaces collection stopped early after {} records: {err}",
                outcome.records.len()
            )
        }
    }
}
