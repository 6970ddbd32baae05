use clap::Args;
use peerlink_agent::{DIDDoc, PeerAgent, VerificationMaterialFormat};
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::output::{print_success, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct CreatePeerDidArgs {
    /// Number of authentication (Ed25519) keys
    #[arg(long, default_value_t = 1)]
    pub auth_keys: usize,
    /// Number of key agreement (X25519) keys
    #[arg(long, default_value_t = 1)]
    pub agreement_keys: usize,
    /// DIDComm messaging service endpoint
    #[arg(long)]
    pub service_endpoint: Option<String>,
    /// Routing keys of the service
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub routing_keys: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ResolvePeerDidArgs {
    /// Peer DID to resolve
    pub did: String,
    /// DID document format (jwk or multibase) [default: the agent's configured format]
    #[arg(long)]
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedDidResponse {
    pub did: String,
    pub key_ids: Vec<String>,
}

/// Creates a peer DID and saves the agent's key store
pub async fn create_peer_did(
    agent: &PeerAgent,
    args: &CreatePeerDidArgs,
) -> Result<CreatedDidResponse> {
    let did = agent
        .create_peer_did(
            args.auth_keys,
            args.agreement_keys,
            args.service_endpoint.as_deref(),
            &args.routing_keys,
        )
        .await?;
    agent.save()?;

    let prefix = format!("{}#", did);
    let key_ids = agent
        .store()
        .list_identifiers()?
        .into_iter()
        .filter(|kid| kid.starts_with(&prefix))
        .collect();
    Ok(CreatedDidResponse { did, key_ids })
}

/// Resolves a peer DID in the requested format
pub async fn resolve_peer_did(agent: &PeerAgent, args: &ResolvePeerDidArgs) -> Result<DIDDoc> {
    let doc = match &args.format {
        Some(format) => {
            let format: VerificationMaterialFormat = format.parse()?;
            debug!(did = %args.did, format = ?format, "Resolving peer DID");
            agent.resolve(&args.did, format).await?
        }
        None => agent.resolve_document(&args.did).await?,
    };
    Ok(doc)
}

pub async fn handle_create(
    agent: &PeerAgent,
    args: &CreatePeerDidArgs,
    format: OutputFormat,
) -> Result<()> {
    let response = create_peer_did(agent, args).await?;
    print_success(format, &response, || response.did.clone());
    Ok(())
}

pub async fn handle_resolve(
    agent: &PeerAgent,
    args: &ResolvePeerDidArgs,
    format: OutputFormat,
) -> Result<()> {
    let doc = resolve_peer_did(agent, args).await?;
    let text = serde_json::to_string_pretty(&doc)?;
    print_success(format, &doc, || text);
    Ok(())
}
