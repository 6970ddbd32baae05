use clap::{ArgAction, Args};
use peerlink_agent::message_packing::{PackOptions, PackResult, UnpackMetadata};
use peerlink_agent::PeerAgent;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::output::{print_success, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct PackArgs {
    /// Message text
    pub message: String,
    /// Receiver's DID, or a DID URL naming one of its keys
    #[arg(long)]
    pub to: String,
    /// Sender's DID. Anonymous encryption is used if not set.
    #[arg(long)]
    pub from: Option<String>,
    /// Signer's DID, which must be the sender
    #[arg(long)]
    pub sign_from: Option<String>,
    /// Hide the sender's key id inside an anonymous layer
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub protect_sender_id: bool,
}

#[derive(Args, Debug, Clone)]
pub struct UnpackArgs {
    /// Packed message JSON
    pub packed: String,
}

#[derive(Debug, Serialize)]
pub struct UnpackResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub metadata: UnpackMetadata,
}

impl UnpackResponse {
    /// The line printed in text mode
    pub fn summary(&self) -> String {
        let to = self.to.as_deref().unwrap_or("unknown");
        match &self.from {
            Some(from) => format!("authcrypted {} from {} to {}", self.message, from, to),
            None => format!("anoncrypted {} to {}", self.message, to),
        }
    }
}

/// Packs a text message
pub async fn pack(agent: &PeerAgent, args: &PackArgs) -> Result<PackResult> {
    let options = PackOptions::new().with_protect_sender_id(args.protect_sender_id);
    let result = agent
        .pack_text_with(
            &args.message,
            &args.to,
            args.from.as_deref(),
            args.sign_from.as_deref(),
            options,
        )
        .await?;
    Ok(result)
}

/// Unpacks a message with the keys in the agent's store
pub async fn unpack(agent: &PeerAgent, args: &UnpackArgs) -> Result<UnpackResponse> {
    let result = agent.unpack(&args.packed).await?;
    let message = result
        .text()
        .ok_or_else(|| Error::command_failed("Message body has no text"))?
        .to_string();
    Ok(UnpackResponse {
        message,
        from: result.sender_did().map(str::to_string),
        to: result.recipient_did().map(str::to_string),
        metadata: result.metadata,
    })
}

pub async fn handle_pack(agent: &PeerAgent, args: &PackArgs, format: OutputFormat) -> Result<()> {
    let result = pack(agent, args).await?;
    print_success(format, &result, || result.packed_msg.clone());
    Ok(())
}

pub async fn handle_unpack(
    agent: &PeerAgent,
    args: &UnpackArgs,
    format: OutputFormat,
) -> Result<()> {
    let response = unpack(agent, args).await?;
    print_success(format, &response, || response.summary());
    Ok(())
}
