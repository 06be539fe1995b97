use anyhow::Result;

use crate::args::{
    DeleteChallengeArgs, GetChallengeArgs, ListChallengesArgs, SessionArgs,
};
use crate::auth::mint_session;
use crate::client::InstancerClient;

fn default_endpoint() -> String {
    "http://localhost:8080".to_string()
}

/// Run the health check CLI command.
pub async fn run_health(endpoint: Option<String>) -> Result<()> {
    let endpoint = endpoint.unwrap_or_else(default_endpoint);
    let client = InstancerClient::new(&endpoint, None);
    client.health().await?;
    println!("Service at {} is healthy", endpoint);
    Ok(())
}

/// Run the get challenge CLI command.
pub async fn run_challenge_get(args: GetChallengeArgs) -> Result<()> {
    let endpoint = args.endpoint.unwrap_or_else(default_endpoint);
    let client = InstancerClient::new(&endpoint, Some(args.token));

    match client.get_challenge(&args.id).await? {
        Some(challenge) => println!("{}", serde_json::to_string_pretty(&challenge)?),
        None => println!("Challenge {} not found", args.id),
    }
    Ok(())
}

/// Run the delete challenge CLI command.
pub async fn run_challenge_delete(args: DeleteChallengeArgs) -> Result<()> {
    let endpoint = args.endpoint.unwrap_or_else(default_endpoint);
    let client = InstancerClient::new(&endpoint, Some(args.token));

    if client.delete_challenge(&args.id).await? {
        println!("Deleted challenge {}", args.id);
    } else {
        println!("Challenge {} not found", args.id);
    }
    Ok(())
}

/// Run the list challenges CLI command.
pub async fn run_challenge_list(args: ListChallengesArgs) -> Result<()> {
    let endpoint = args.endpoint.unwrap_or_else(default_endpoint);
    let client = InstancerClient::new(&endpoint, Some(args.token));

    let challenges = client.list_challenges().await?;
    println!("{}", serde_json::to_string_pretty(&challenges)?);
    Ok(())
}

/// Mint a session token directly in Redis; the operator bootstrap path.
pub async fn run_session(args: SessionArgs) -> Result<()> {
    let redis = instancer_common::redis::init_redis(&args.redis).await;
    let token = mint_session(&redis, &args.team_id.to_string(), args.session_length).await?;
    println!("{token}");
    Ok(())
}
