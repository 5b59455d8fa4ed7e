//! Turning chain notifications into trigger data.

use chainflow_chain::SubscriptionRequest;
use chainflow_core::{ExecutionId, WorkflowId};
use chainflow_workflow::{NodeId, TriggerConfig};
use regex::Regex;
use serde_json::{Value as JsonValue, json};
use sha2::{Digest, Sha256};

/// Deterministic execution id for one notification.
///
/// Redelivered or replayed notifications for the same slot hash to the same
/// id, so the queue and the execution table drop the repeats.
#[must_use]
pub fn execution_id(
    workflow_id: WorkflowId,
    slot: u64,
    trigger_node_id: &NodeId,
    discriminator: &str,
) -> ExecutionId {
    let mut hasher = Sha256::new();
    hasher.update(format!("{workflow_id}|{slot}|{trigger_node_id}:{discriminator}"));
    ExecutionId::new(format!("{:x}", hasher.finalize()))
}

/// Subscription needed by a chain-event trigger. Cron triggers need none.
#[must_use]
pub fn request_for(config: &TriggerConfig) -> Option<SubscriptionRequest> {
    match config {
        TriggerConfig::BalanceChange { address, .. } => Some(SubscriptionRequest::Account {
            address: address.clone(),
        }),
        TriggerConfig::TokenReceipt { token_account, .. } => Some(SubscriptionRequest::Account {
            address: token_account.clone(),
        }),
        TriggerConfig::NftReceipt { wallet, .. } => Some(SubscriptionRequest::Logs {
            mentions: wallet.clone(),
        }),
        TriggerConfig::ProgramLog { program_id, .. } => Some(SubscriptionRequest::Logs {
            mentions: program_id.clone(),
        }),
        TriggerConfig::Cron { .. } => None,
    }
}

/// A notification that passed the trigger's own checks.
#[derive(Debug, Clone, PartialEq)]
pub struct Matched {
    pub trigger_data: JsonValue,
    /// Watched address for account triggers, signature for log triggers.
    pub discriminator: String,
}

/// Per-subscription matching state.
#[derive(Debug, Clone)]
pub struct TriggerMatcher {
    config: TriggerConfig,
    log_filter: Option<Regex>,
    /// Last lamports or token amount seen on the watched account.
    last_amount: Option<u64>,
}

impl TriggerMatcher {
    /// Builds a matcher, compiling the log filter if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the log filter is not a valid regex.
    pub fn new(config: TriggerConfig) -> Result<Self, regex::Error> {
        let log_filter = match &config {
            TriggerConfig::ProgramLog {
                log_filter: Some(pattern),
                ..
            } => Some(Regex::new(pattern)?),
            _ => None,
        };
        Ok(Self {
            config,
            log_filter,
            last_amount: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Checks one notification payload. `None` means no job.
    pub fn observe(&mut self, slot: u64, payload: &JsonValue) -> Option<Matched> {
        match &self.config {
            TriggerConfig::BalanceChange {
                address,
                min_change_lamports,
            } => {
                let lamports = payload["lamports"].as_u64()?;
                let previous = self.last_amount.replace(lamports);
                let delta = previous.map(|p| i128::from(lamports) - i128::from(p));
                if let Some(min) = min_change_lamports {
                    match delta {
                        Some(d) if d.unsigned_abs() >= u128::from(*min) => {}
                        _ => return None,
                    }
                }
                if delta == Some(0) {
                    return None;
                }
                Some(Matched {
                    trigger_data: json!({
                        "type": "balance_change",
                        "address": address,
                        "lamports": lamports,
                        "previousLamports": previous,
                        "delta": delta.and_then(|d| i64::try_from(d).ok()),
                        "slot": slot,
                    }),
                    discriminator: address.clone(),
                })
            }
            TriggerConfig::TokenReceipt {
                token_account,
                mint,
            } => {
                let info = &payload["data"]["parsed"]["info"];
                let account_mint = info["mint"].as_str().unwrap_or_default();
                if mint.as_deref().is_some_and(|m| m != account_mint) {
                    return None;
                }
                let amount: u64 = info["tokenAmount"]["amount"].as_str()?.parse().ok()?;
                let previous = self.last_amount.replace(amount);
                if previous.is_some_and(|p| amount <= p) {
                    return None;
                }
                Some(Matched {
                    trigger_data: json!({
                        "type": "token_receipt",
                        "tokenAccount": token_account,
                        "mint": account_mint,
                        "owner": info["owner"],
                        "amount": amount,
                        "previousAmount": previous,
                        "received": previous.map(|p| amount - p),
                        "decimals": info["tokenAmount"]["decimals"],
                        "uiAmount": info["tokenAmount"]["uiAmount"],
                        "slot": slot,
                    }),
                    discriminator: token_account.clone(),
                })
            }
            TriggerConfig::NftReceipt { wallet, collection } => {
                if !payload["err"].is_null() {
                    return None;
                }
                let signature = payload["signature"].as_str()?;
                Some(Matched {
                    trigger_data: json!({
                        "type": "nft_receipt",
                        "wallet": wallet,
                        "collection": collection,
                        "signature": signature,
                        "logs": payload["logs"],
                        "slot": slot,
                    }),
                    discriminator: signature.to_string(),
                })
            }
            TriggerConfig::ProgramLog { program_id, .. } => {
                let signature = payload["signature"].as_str()?;
                let logs: Vec<&str> = payload["logs"]
                    .as_array()
                    .map(|lines| lines.iter().filter_map(JsonValue::as_str).collect())
                    .unwrap_or_default();
                let matched_line = match &self.log_filter {
                    Some(filter) => Some(*logs.iter().find(|line| filter.is_match(line))?),
                    None => None,
                };
                Some(Matched {
                    trigger_data: json!({
                        "type": "program_log",
                        "programId": program_id,
                        "signature": signature,
                        "err": payload["err"],
                        "logs": logs,
                        "matchedLog": matched_line,
                        "slot": slot,
                    }),
                    discriminator: signature.to_string(),
                })
            }
            TriggerConfig::Cron { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(min: Option<u64>) -> TriggerMatcher {
        TriggerMatcher::new(TriggerConfig::BalanceChange {
            address: "Wallet1".to_string(),
            min_change_lamports: min,
        })
        .expect("matcher")
    }

    fn program_log(filter: Option<&str>) -> TriggerMatcher {
        TriggerMatcher::new(TriggerConfig::ProgramLog {
            program_id: "Prog1".to_string(),
            log_filter: filter.map(str::to_string),
        })
        .expect("matcher")
    }

    fn logs(signature: &str, lines: &[&str]) -> JsonValue {
        json!({ "signature": signature, "err": null, "logs": lines })
    }

    #[test]
    fn execution_id_is_deterministic_and_distinct() {
        let wf = WorkflowId::new();
        let node = NodeId::from("t1");

        let a = execution_id(wf, 100, &node, "Wallet1");
        let b = execution_id(wf, 100, &node, "Wallet1");
        let c = execution_id(wf, 101, &node, "Wallet1");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn cron_needs_no_subscription() {
        let cron = TriggerConfig::Cron {
            schedule: "* * * * *".to_string(),
            timezone: None,
            payload: None,
        };
        assert!(request_for(&cron).is_none());
        assert_eq!(
            request_for(&TriggerConfig::NftReceipt {
                wallet: "W".to_string(),
                collection: None
            }),
            Some(SubscriptionRequest::Logs {
                mentions: "W".to_string()
            })
        );
    }

    #[test]
    fn balance_change_reports_delta() {
        let mut matcher = balance(None);

        let first = matcher.observe(1, &json!({ "lamports": 1_000 })).expect("first");
        assert!(first.trigger_data["previousLamports"].is_null());

        let second = matcher.observe(2, &json!({ "lamports": 400 })).expect("second");
        assert_eq!(second.trigger_data["delta"], -600);
        assert_eq!(second.trigger_data["previousLamports"], 1_000);
        assert_eq!(second.discriminator, "Wallet1");
    }

    #[test]
    fn small_changes_are_suppressed() {
        let mut matcher = balance(Some(500));

        assert!(matcher.observe(1, &json!({ "lamports": 1_000 })).is_none());
        assert!(matcher.observe(2, &json!({ "lamports": 1_200 })).is_none());
        let big = matcher.observe(3, &json!({ "lamports": 2_000 })).expect("big change");
        assert_eq!(big.trigger_data["delta"], 800);
    }

    #[test]
    fn unchanged_balance_is_ignored() {
        let mut matcher = balance(None);
        matcher.observe(1, &json!({ "lamports": 5 }));
        assert!(matcher.observe(2, &json!({ "lamports": 5 })).is_none());
    }

    #[test]
    fn token_receipt_needs_an_increase_of_the_right_mint() {
        let mut matcher = TriggerMatcher::new(TriggerConfig::TokenReceipt {
            token_account: "Ata1".to_string(),
            mint: Some("USDC".to_string()),
        })
        .expect("matcher");
        let account = |mint: &str, amount: &str| {
            json!({ "data": { "parsed": { "info": {
                "mint": mint,
                "owner": "Wallet1",
                "tokenAmount": { "amount": amount, "decimals": 6, "uiAmount": 1.0 }
            }}}})
        };

        assert!(matcher.observe(1, &account("BONK", "10")).is_none());
        assert!(matcher.observe(2, &account("USDC", "10")).is_some());
        assert!(matcher.observe(3, &account("USDC", "5")).is_none());
        let receipt = matcher.observe(4, &account("USDC", "25")).expect("receipt");
        assert_eq!(receipt.trigger_data["received"], 20);
    }

    #[test]
    fn log_filter_requires_a_matching_line() {
        let mut matcher = program_log(Some(r"Instruction: (Buy|Sell)"));

        assert!(
            matcher
                .observe(1, &logs("sig1", &["Program log: Instruction: Transfer"]))
                .is_none()
        );
        let hit = matcher
            .observe(2, &logs("sig2", &["Program log: Instruction: Buy"]))
            .expect("match");
        assert_eq!(hit.discriminator, "sig2");
        assert_eq!(hit.trigger_data["matchedLog"], "Program log: Instruction: Buy");
    }

    #[test]
    fn no_filter_matches_every_log() {
        let mut matcher = program_log(None);
        assert!(matcher.observe(1, &logs("sig", &[])).is_some());
    }

    #[test]
    fn invalid_filter_is_rejected() {
        assert!(
            TriggerMatcher::new(TriggerConfig::ProgramLog {
                program_id: "Prog1".to_string(),
                log_filter: Some("(".to_string()),
            })
            .is_err()
        );
    }

    #[test]
    fn failed_transactions_do_not_count_as_nft_receipts() {
        let mut matcher = TriggerMatcher::new(TriggerConfig::NftReceipt {
            wallet: "Wallet1".to_string(),
            collection: None,
        })
        .expect("matcher");

        let failed = json!({ "signature": "s", "err": { "InstructionError": [0, "Custom"] }, "logs": [] });
        assert!(matcher.observe(1, &failed).is_none());
        assert!(matcher.observe(2, &logs("s2", &[])).is_some());
    }
}
