//! On-chain transaction submission.
//!
//! The platform never holds private keys. Transfers and program calls are
//! described as a [`TransactionRequest`] and handed to a signing relay that
//! owns the workflow's wallet, builds the transaction and returns the
//! signature once it has been sent.

use crate::error::ConnectorError;
use crate::http::{check_status, transport_error};
use async_trait::async_trait;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

/// Lamports in one SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// An account passed to a program instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMeta {
    /// Base58 public key.
    pub pubkey: String,
    /// Whether the account signs the transaction.
    #[serde(default)]
    pub is_signer: bool,
    /// Whether the instruction writes to the account.
    #[serde(default)]
    pub is_writable: bool,
}

/// A transaction the relay should build, sign and send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionRequest {
    /// Native SOL transfer.
    SolTransfer {
        /// Recipient address.
        to: String,
        /// Amount in lamports.
        lamports: u64,
    },
    /// SPL token transfer.
    TokenTransfer {
        /// Recipient wallet address.
        to: String,
        /// Token mint address.
        mint: String,
        /// Amount in base units.
        amount: u64,
        /// Mint decimals, when the caller knows them.
        decimals: Option<u8>,
    },
    /// Arbitrary program instruction.
    ProgramCall {
        /// Program address.
        program_id: String,
        /// Base64 encoded instruction data.
        instruction_data: String,
        /// Accounts in instruction order.
        accounts: Vec<AccountMeta>,
    },
}

impl TransactionRequest {
    /// Short name of the request kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SolTransfer { .. } => "sol_transfer",
            Self::TokenTransfer { .. } => "token_transfer",
            Self::ProgramCall { .. } => "program_call",
        }
    }
}

/// Result of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Transaction signature.
    pub signature: String,
}

/// Trait for transaction submission.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Submits a transaction.
    ///
    /// `idempotency_key` is stable across redeliveries of the same execution,
    /// so the relay can refuse to send the same transfer twice.
    async fn submit(
        &self,
        idempotency_key: &str,
        request: &TransactionRequest,
    ) -> Result<TransactionReceipt, Report<ConnectorError>>;
}

/// HTTP client for the signing relay.
#[derive(Debug, Clone)]
pub struct HttpSigningRelay {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSigningRelay {
    /// Creates a relay client.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl TransactionSubmitter for HttpSigningRelay {
    #[instrument(skip(self, request), fields(kind = request.kind()))]
    async fn submit(
        &self,
        idempotency_key: &str,
        request: &TransactionRequest,
    ) -> Result<TransactionReceipt, Report<ConnectorError>> {
        let mut builder = self
            .client
            .post(format!("{}/transactions", self.base_url))
            .json(&json!({
                "idempotency_key": idempotency_key,
                "request": request,
            }));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let response = check_status(response).await?;
        let receipt: TransactionReceipt =
            response
                .json()
                .await
                .map_err(|e| ConnectorError::ProtocolError {
                    reason: format!("invalid relay response: {e}"),
                })?;

        debug!(signature = %receipt.signature, "transaction submitted");
        Ok(receipt)
    }
}
