//! Workflow node types and configurations.
//!
//! Nodes are the building blocks of workflows. Each node has:
//! - An opaque ID, unique within its graph
//! - A role: Trigger, Filter, Action or Notify
//! - A typed configuration for that role
//!
//! Configs are tagged unions, so a graph that deserializes has the right
//! shape for every node. Semantic checks (non-empty addresses, compiling
//! regexes, price ranges) happen in [`Node::config_errors`].

use chainflow_integration::{AccountMeta, NotificationTarget, OrderSide};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// A unique identifier for a node within a workflow.
///
/// Ids come from the workflow builder and are treated as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The role of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry points that initiate workflow execution.
    Trigger,
    /// Conditional gates that can stop a branch.
    Filter,
    /// Side-effecting operations (transfers, program calls, orders).
    Action,
    /// Best-effort notifications.
    Notify,
}

impl NodeKind {
    /// Returns the kind name as used in serialized graphs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Filter => "filter",
            Self::Action => "action",
            Self::Notify => "notify",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for trigger nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger_type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Lamport balance of an account changed.
    BalanceChange {
        /// Watched account address.
        address: String,
        /// Ignore changes smaller than this many lamports.
        #[serde(default)]
        min_change_lamports: Option<u64>,
    },
    /// A token account received tokens.
    TokenReceipt {
        /// Watched token account address.
        token_account: String,
        /// Expected mint, if the trigger should be restricted to one.
        #[serde(default)]
        mint: Option<String>,
    },
    /// A wallet received an NFT.
    NftReceipt {
        /// Watched wallet address.
        wallet: String,
        /// Collection address, if restricted.
        #[serde(default)]
        collection: Option<String>,
    },
    /// A program emitted logs.
    ProgramLog {
        /// Program address whose logs are watched.
        program_id: String,
        /// Regex that at least one log line must match.
        #[serde(default)]
        log_filter: Option<String>,
    },
    /// Recurring schedule.
    Cron {
        /// Cron expression (5 fields, or 6 with leading seconds).
        schedule: String,
        /// IANA timezone for the schedule. Defaults to UTC.
        #[serde(default)]
        timezone: Option<String>,
        /// Static payload delivered as trigger data.
        #[serde(default)]
        payload: Option<JsonValue>,
    },
}

impl TriggerConfig {
    /// Returns the trigger type name.
    #[must_use]
    pub fn trigger_type(&self) -> &'static str {
        match self {
            Self::BalanceChange { .. } => "balance_change",
            Self::TokenReceipt { .. } => "token_receipt",
            Self::NftReceipt { .. } => "nft_receipt",
            Self::ProgramLog { .. } => "program_log",
            Self::Cron { .. } => "cron",
        }
    }

    /// Returns true for triggers driven by live chain subscriptions.
    #[must_use]
    pub fn is_chain_event(&self) -> bool {
        !self.is_cron()
    }

    /// Returns true for scheduled triggers.
    #[must_use]
    pub fn is_cron(&self) -> bool {
        matches!(self, Self::Cron { .. })
    }
}

/// Comparison operator for a filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    StartsWith,
    EndsWith,
}

/// A single filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot path into trigger data, or `$name.path` into variables.
    pub field: String,
    /// Comparison operator.
    pub operator: ConditionOperator,
    /// Value to compare against.
    pub value: JsonValue,
}

/// How filter conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterLogic {
    #[default]
    And,
    Or,
}

/// Configuration for filter nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Conditions to evaluate. An empty list passes.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Combination logic.
    #[serde(default)]
    pub logic: FilterLogic,
}

/// Configuration for action nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum ActionConfig {
    /// Transfer native SOL.
    SendSol {
        /// Recipient address.
        to: String,
        /// Amount in SOL.
        amount_sol: f64,
    },
    /// Transfer an SPL token.
    SendSplToken {
        /// Recipient wallet address.
        to: String,
        /// Token mint.
        mint: String,
        /// Amount in base units.
        amount: u64,
        /// Mint decimals.
        #[serde(default)]
        decimals: Option<u8>,
    },
    /// Invoke a program instruction.
    CallProgram {
        /// Program address.
        program_id: String,
        /// Base64 instruction data.
        instruction_data: String,
        /// Instruction accounts in order.
        #[serde(default)]
        accounts: Vec<AccountMeta>,
    },
    /// Place a limit order on the prediction market exchange.
    PlaceOrder {
        /// Market ticker.
        market_ticker: String,
        /// Side to buy.
        side: OrderSide,
        /// Contract count.
        count: u32,
        /// Limit price per contract in cents.
        limit_price_cents: u32,
        /// Ceiling on this order's total cost in cents.
        #[serde(default)]
        max_cost_cents: Option<u64>,
    },
    /// Placeholder action that does nothing.
    DoNothing,
}

impl ActionConfig {
    /// Returns the action type name.
    #[must_use]
    pub fn action_type(&self) -> &'static str {
        match self {
            Self::SendSol { .. } => "send_sol",
            Self::SendSplToken { .. } => "send_spl_token",
            Self::CallProgram { .. } => "call_program",
            Self::PlaceOrder { .. } => "place_order",
            Self::DoNothing => "do_nothing",
        }
    }
}

/// Configuration for notify nodes.
///
/// Accepts either a single destination with its fields inline
/// (`{"notify_type": "discord", "webhook_url": ...}`) or a list under
/// `notifications`. Both forms normalize to `destinations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NotifyConfigDocument", into = "NotifyConfigDocument")]
pub struct NotifyConfig {
    /// Where to deliver.
    pub destinations: Vec<NotificationTarget>,
    /// Message template with `{{path}}` placeholders.
    pub template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NotifyConfigDocument {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    notifications: Vec<NotificationTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template: Option<String>,
    #[serde(flatten)]
    inline: Map<String, JsonValue>,
}

impl TryFrom<NotifyConfigDocument> for NotifyConfig {
    type Error = String;

    fn try_from(doc: NotifyConfigDocument) -> Result<Self, Self::Error> {
        let mut destinations = Vec::with_capacity(doc.notifications.len() + 1);
        if doc.inline.contains_key("notify_type") {
            let inline: NotificationTarget = serde_json::from_value(JsonValue::Object(doc.inline))
                .map_err(|e| format!("invalid notify destination: {e}"))?;
            destinations.push(inline);
        }
        destinations.extend(doc.notifications);
        Ok(Self {
            destinations,
            template: doc.template,
        })
    }
}

impl From<NotifyConfig> for NotifyConfigDocument {
    fn from(config: NotifyConfig) -> Self {
        Self {
            notifications: config.destinations,
            template: config.template,
            inline: Map::new(),
        }
    }
}

/// Configuration for a node, varying by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NodeConfig {
    Trigger(TriggerConfig),
    Filter(FilterConfig),
    Action(ActionConfig),
    Notify(NotifyConfig),
}

impl NodeConfig {
    /// Returns the role of this node configuration.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Trigger(_) => NodeKind::Trigger,
            Self::Filter(_) => NodeKind::Filter,
            Self::Action(_) => NodeKind::Action,
            Self::Notify(_) => NodeKind::Notify,
        }
    }
}

/// A workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node within the workflow.
    pub id: NodeId,
    /// Human-readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Node configuration (determines role and behavior).
    #[serde(flatten)]
    pub config: NodeConfig,
}

impl Node {
    /// Creates a node with the given configuration.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            name: None,
            config,
        }
    }

    /// Creates a trigger node.
    #[must_use]
    pub fn trigger(id: impl Into<NodeId>, config: TriggerConfig) -> Self {
        Self::new(id, NodeConfig::Trigger(config))
    }

    /// Creates a filter node.
    #[must_use]
    pub fn filter(id: impl Into<NodeId>, config: FilterConfig) -> Self {
        Self::new(id, NodeConfig::Filter(config))
    }

    /// Creates an action node.
    #[must_use]
    pub fn action(id: impl Into<NodeId>, config: ActionConfig) -> Self {
        Self::new(id, NodeConfig::Action(config))
    }

    /// Creates a notify node.
    #[must_use]
    pub fn notify(id: impl Into<NodeId>, config: NotifyConfig) -> Self {
        Self::new(id, NodeConfig::Notify(config))
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the node's role.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }

    /// Returns the trigger config if this is a trigger node.
    #[must_use]
    pub fn as_trigger(&self) -> Option<&TriggerConfig> {
        match &self.config {
            NodeConfig::Trigger(config) => Some(config),
            _ => None,
        }
    }

    /// Checks the node's configuration values.
    ///
    /// Returns one human-readable reason per problem; empty means valid.
    /// Cron expressions are only checked for presence here.
    #[must_use]
    pub fn config_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match &self.config {
            NodeConfig::Trigger(trigger) => trigger_errors(trigger, &mut errors),
            NodeConfig::Filter(filter) => {
                for (i, condition) in filter.conditions.iter().enumerate() {
                    if condition.field.trim().is_empty() {
                        errors.push(format!("condition {i} has an empty field"));
                    }
                }
            }
            NodeConfig::Action(action) => action_errors(action, &mut errors),
            NodeConfig::Notify(notify) => {
                if notify.destinations.is_empty() {
                    errors.push("notify node has no destinations".to_string());
                }
                for target in &notify.destinations {
                    let value = match target {
                        NotificationTarget::Discord { webhook_url } => webhook_url,
                        NotificationTarget::Telegram { chat_id } => chat_id,
                        NotificationTarget::Webhook { url } => url,
                    };
                    if value.trim().is_empty() {
                        errors.push(format!("{} destination is missing its target", target.channel()));
                    }
                }
            }
        }
        errors
    }
}

fn require(value: &str, field: &str, errors: &mut Vec<String>) {
    if value.trim().is_empty() {
        errors.push(format!("{field} is required"));
    }
}

fn trigger_errors(trigger: &TriggerConfig, errors: &mut Vec<String>) {
    match trigger {
        TriggerConfig::BalanceChange { address, .. } => require(address, "address", errors),
        TriggerConfig::TokenReceipt { token_account, .. } => {
            require(token_account, "token_account", errors);
        }
        TriggerConfig::NftReceipt { wallet, .. } => require(wallet, "wallet", errors),
        TriggerConfig::ProgramLog {
            program_id,
            log_filter,
        } => {
            require(program_id, "program_id", errors);
            if let Some(pattern) = log_filter
                && let Err(e) = Regex::new(pattern)
            {
                errors.push(format!("log_filter is not a valid regex: {e}"));
            }
        }
        TriggerConfig::Cron { schedule, .. } => require(schedule, "schedule", errors),
    }
}

fn action_errors(action: &ActionConfig, errors: &mut Vec<String>) {
    match action {
        ActionConfig::SendSol { to, amount_sol } => {
            require(to, "to", errors);
            if !amount_sol.is_finite() || *amount_sol <= 0.0 {
                errors.push("amount_sol must be a positive number".to_string());
            }
        }
        ActionConfig::SendSplToken {
            to, mint, amount, ..
        } => {
            require(to, "to", errors);
            require(mint, "mint", errors);
            if *amount == 0 {
                errors.push("amount must be greater than zero".to_string());
            }
        }
        ActionConfig::CallProgram {
            program_id,
            accounts,
            ..
        } => {
            require(program_id, "program_id", errors);
            for account in accounts {
                require(&account.pubkey, "account pubkey", errors);
            }
        }
        ActionConfig::PlaceOrder {
            market_ticker,
            count,
            limit_price_cents,
            ..
        } => {
            require(market_ticker, "market_ticker", errors);
            if *count == 0 {
                errors.push("count must be greater than zero".to_string());
            }
            if !(1..=99).contains(limit_price_cents) {
                errors.push("limit_price_cents must be between 1 and 99".to_string());
            }
        }
        ActionConfig::DoNothing => {}
    }
}
