use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use dao_analysis::datasets;
use dao_analysis::env::ENV_CONFIG;
use dao_analysis::paginate::{fetch_all, CheckpointConfig, FetchOptions, FetchStatus};
use dao_analysis::snapshot::{QueryTemplate, SnapshotRest};
use serde_json::json;
use tracing::info;

// Raw-text queries for the REST transport, paginated through literal token
// substitution.
const VOTES_QUERY: &str = r#"
query ($first: Int!, $skip: Int!) {
  votes(first: $first, skip: $skip, orderBy: "created", orderDirection: asc) {
    id
    voter
    created
    choice
    space {
      id
    }
    proposal {
      id
    }
  }
}
"#;

const SPACE_VOTES_QUERY: &str = r#"
query ($first: Int!, $skip: Int!) {
  votes(first: $first, skip: $skip, orderBy: "created", orderDirection: asc, where: { space: "$space" }) {
    id
    voter
    created
    choice
    proposal {
      id
    }
  }
}
"#;

#[derive(Parser, Debug)]
#[clap(about = "Fetch Snapshot votes into sequence-numbered JSON datasets")]
struct Args {
    /// Restrict the fetch to one space id, e.g. uniswap.eth.
    #[clap(long)]
    space: Option<String>,
    /// Seed the run with the records of a previous dataset file and resume
    /// fetching after them.
    #[clap(long)]
    resume_from: Option<PathBuf>,
    /// Stop after this many page queries.
    #[clap(long)]
    limit: Option<u64>,
    /// First sequence number for the partial artifacts.
    #[clap(long, default_value_t = 1)]
    start_seq: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dao_analysis::log::init();
    let args = Args::parse();

    let query = match args.space {
        Some(_) => SPACE_VOTES_QUERY,
        None => VOTES_QUERY,
    };
    // Fail fast on a template the transport could not paginate.
    QueryTemplate::new(query)?;

    let mut extra_vars = BTreeMap::new();
    if let Some(space) = &args.space {
        extra_vars.insert("space".to_string(), json!(space));
    }

    let seed_records = match &args.resume_from {
        Some(path) => {
            let records = datasets::read_records(path)?;
            info!(seed = records.len(), path = %path.display(), "resuming from dataset");
            records
        }
        None => Vec::new(),
    };

    let transport = SnapshotRest::new();
    let options = FetchOptions {
        seed_records,
        iteration_limit: args.limit,
        extra_vars,
        checkpoint: Some(CheckpointConfig {
            clear_on_save: true,
            start_seq: args.start_seq,
            data_dir: ENV_CONFIG.data_dir.clone(),
            ..CheckpointConfig::new("votes.json")
        }),
        ..FetchOptions::default()
    };

    let outcome = fetch_all(&transport, query, "votes", options).await?;
    match outcome.status {
        FetchStatus::Exhausted => {
            info!("fetched all votes");
            Ok(())
        }
        FetchStatus::LimitReached => {
            info!("stopped at iteration limit");
            Ok(())
        }
        FetchStatus::Failed(err) => bail!("votes collection stopped early: {err}"),
    }
}
