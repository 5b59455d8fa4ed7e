//! Action node executor.
//!
//! Transfers and program calls go to the transaction submitter; order
//! placement goes to the exchange client after the pre-trade checks:
//!
//! 1. Per-order `max_cost_cents` ceiling (hard)
//! 2. Workflow `max_order_cost_cents` ceiling (hard)
//! 3. Market status lookup (lookup failure warns, closed market is hard)
//! 4. Existing exposure lookup (lookup failure warns and assumes none),
//!    then the workflow `max_position_cents` ceiling (hard)

use crate::context::{ExecutionContext, ORDER_ID_VAR, TX_SIGNATURE_VAR};
use crate::engine::NodeExecutor;
use crate::error::ExecutionError;
use crate::node::{ActionConfig, Node, NodeConfig, NodeKind};
use async_trait::async_trait;
use chainflow_integration::transaction::LAMPORTS_PER_SOL;
use chainflow_integration::{OrderClient, OrderRequest, TransactionRequest, TransactionSubmitter};
use rootcause::Report;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Executes action nodes.
#[derive(Clone, Default)]
pub struct ActionExecutor {
    transactions: Option<Arc<dyn TransactionSubmitter>>,
    orders: Option<Arc<dyn OrderClient>>,
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("transactions", &self.transactions.is_some())
            .field("orders", &self.orders.is_some())
            .finish()
    }
}

impl ActionExecutor {
    /// Creates an executor with no collaborators; only `do_nothing` works.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transaction submitter.
    #[must_use]
    pub fn with_transactions(mut self, transactions: Arc<dyn TransactionSubmitter>) -> Self {
        self.transactions = Some(transactions);
        self
    }

    /// Sets the exchange client.
    #[must_use]
    pub fn with_orders(mut self, orders: Arc<dyn OrderClient>) -> Self {
        self.orders = Some(orders);
        self
    }

    async fn submit(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        request: TransactionRequest,
    ) -> Result<JsonValue, Report<ExecutionError>> {
        let transactions =
            self.transactions
                .as_ref()
                .ok_or_else(|| ExecutionError::NotConfigured {
                    collaborator: "transaction relay".to_string(),
                })?;

        let receipt = transactions
            .submit(&ctx.idempotency_key(&node.id), &request)
            .await
            .map_err(|e| ExecutionError::Collaborator {
                operation: request.kind().to_string(),
                reason: e.current_context().to_string(),
            })?;

        info!(node_id = %node.id, signature = %receipt.signature, "transaction submitted");
        ctx.set_variable(TX_SIGNATURE_VAR, json!(receipt.signature));
        Ok(json!({ "signature": receipt.signature }))
    }

    async fn send_sol(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        to: &str,
        amount_sol: f64,
    ) -> Result<JsonValue, Report<ExecutionError>> {
        if let Some(max) = ctx.metadata.limits.max_sol_per_transaction
            && amount_sol > max
        {
            return Err(ExecutionError::SafetyLimitExceeded {
                limit: "max_sol_per_transaction".to_string(),
                reason: format!("{amount_sol} SOL exceeds {max} SOL"),
            }
            .into());
        }

        let lamports = sol_to_lamports(amount_sol);
        self.submit(
            node,
            ctx,
            TransactionRequest::SolTransfer {
                to: to.to_string(),
                lamports,
            },
        )
        .await
    }

    #[instrument(skip_all, fields(node_id = %node.id, ticker = %order.market_ticker))]
    async fn place_order(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        order: OrderRequest,
        max_cost_cents: Option<u64>,
    ) -> Result<JsonValue, Report<ExecutionError>> {
        let orders = self
            .orders
            .as_ref()
            .ok_or_else(|| ExecutionError::NotConfigured {
                collaborator: "exchange client".to_string(),
            })?;

        let market_ticker = order.market_ticker.as_str();
        let cost = order.cost_cents();
        let limits = &ctx.metadata.limits;

        if let Some(max) = max_cost_cents
            && cost > max
        {
            return Err(ExecutionError::SafetyLimitExceeded {
                limit: "max_cost_cents".to_string(),
                reason: format!("order costs {cost} cents, ceiling is {max}"),
            }
            .into());
        }
        if let Some(max) = limits.max_order_cost_cents
            && cost > max
        {
            return Err(ExecutionError::SafetyLimitExceeded {
                limit: "max_order_cost_cents".to_string(),
                reason: format!("order costs {cost} cents, workflow ceiling is {max}"),
            }
            .into());
        }

        match orders.market(market_ticker).await {
            Ok(market) if !market.is_open() => {
                return Err(ExecutionError::MarketClosed {
                    ticker: market.ticker,
                    status: market.status,
                }
                .into());
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e.current_context(), "market status lookup failed, proceeding");
            }
        }

        if let Some(max) = limits.max_position_cents {
            let exposure = match orders.position(market_ticker).await {
                Ok(position) => position.map_or(0, |p| p.market_exposure.unsigned_abs()),
                Err(e) => {
                    warn!(error = %e.current_context(), "position lookup failed, assuming no exposure");
                    0
                }
            };
            if exposure + cost > max {
                return Err(ExecutionError::SafetyLimitExceeded {
                    limit: "max_position_cents".to_string(),
                    reason: format!(
                        "exposure {exposure} + order {cost} cents exceeds ceiling {max}"
                    ),
                }
                .into());
            }
        }

        let receipt = orders
            .place_order(&order)
            .await
            .map_err(|e| ExecutionError::Collaborator {
                operation: "place_order".to_string(),
                reason: e.current_context().to_string(),
            })?;

        info!(order_id = %receipt.order_id, cost_cents = cost, "order placed");
        ctx.set_variable(ORDER_ID_VAR, json!(receipt.order_id));
        Ok(json!({ "order_id": receipt.order_id, "status": receipt.status }))
    }
}

fn sol_to_lamports(amount_sol: f64) -> u64 {
    // validated positive and finite at save time
    (amount_sol * LAMPORTS_PER_SOL as f64).round() as u64
}

#[async_trait]
impl NodeExecutor for ActionExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<JsonValue, Report<ExecutionError>> {
        let NodeConfig::Action(action) = &node.config else {
            return Err(ExecutionError::UnexpectedConfig {
                expected: NodeKind::Action,
                found: node.kind(),
            }
            .into());
        };

        match action {
            ActionConfig::SendSol { to, amount_sol } => {
                self.send_sol(node, ctx, to, *amount_sol).await
            }
            ActionConfig::SendSplToken {
                to,
                mint,
                amount,
                decimals,
            } => {
                let request = TransactionRequest::TokenTransfer {
                    to: to.clone(),
                    mint: mint.clone(),
                    amount: *amount,
                    decimals: *decimals,
                };
                self.submit(node, ctx, request).await
            }
            ActionConfig::CallProgram {
                program_id,
                instruction_data,
                accounts,
            } => {
                let request = TransactionRequest::ProgramCall {
                    program_id: program_id.clone(),
                    instruction_data: instruction_data.clone(),
                    accounts: accounts.clone(),
                };
                self.submit(node, ctx, request).await
            }
            ActionConfig::PlaceOrder {
                market_ticker,
                side,
                count,
                limit_price_cents,
                max_cost_cents,
            } => {
                let order = OrderRequest {
                    market_ticker: market_ticker.clone(),
                    side: *side,
                    count: *count,
                    limit_price_cents: *limit_price_cents,
                    client_order_id: ctx.idempotency_key(&node.id),
                };
                self.place_order(node, ctx, order, *max_cost_cents).await
            }
            ActionConfig::DoNothing => Ok(json!({ "action": "do_nothing" })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{SafetyLimits, WorkflowMetadata};
    use chainflow_core::{ExecutionId, WorkflowId};
    use chainflow_integration::{
        ConnectorError, MarketInfo, OrderReceipt, OrderSide, Position, TransactionReceipt,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRelay {
        submitted: Mutex<Vec<(String, TransactionRequest)>>,
    }

    #[async_trait]
    impl TransactionSubmitter for RecordingRelay {
        async fn submit(
            &self,
            idempotency_key: &str,
            request: &TransactionRequest,
        ) -> Result<TransactionReceipt, Report<ConnectorError>> {
            self.submitted
                .lock()
                .expect("lock")
                .push((idempotency_key.to_string(), request.clone()));
            Ok(TransactionReceipt {
                signature: "5sig".to_string(),
            })
        }
    }

    struct FakeExchange {
        market_status: Result<&'static str, ()>,
        exposure: Result<Option<i64>, ()>,
        placed: Mutex<Vec<OrderRequest>>,
    }

    impl FakeExchange {
        fn open() -> Self {
            Self {
                market_status: Ok("open"),
                exposure: Ok(None),
                placed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OrderClient for FakeExchange {
        async fn market(&self, ticker: &str) -> Result<MarketInfo, Report<ConnectorError>> {
            match self.market_status {
                Ok(status) => Ok(MarketInfo {
                    ticker: ticker.to_string(),
                    status: status.to_string(),
                }),
                Err(()) => Err(ConnectorError::Timeout.into()),
            }
        }

        async fn position(
            &self,
            ticker: &str,
        ) -> Result<Option<Position>, Report<ConnectorError>> {
            match self.exposure {
                Ok(exposure) => Ok(exposure.map(|market_exposure| Position {
                    ticker: ticker.to_string(),
                    position: 1,
                    market_exposure,
                })),
                Err(()) => Err(ConnectorError::Timeout.into()),
            }
        }

        async fn place_order(
            &self,
            order: &OrderRequest,
        ) -> Result<OrderReceipt, Report<ConnectorError>> {
            self.placed.lock().expect("lock").push(order.clone());
            Ok(OrderReceipt {
                order_id: "ord-1".to_string(),
                status: "resting".to_string(),
            })
        }
    }

    fn ctx(limits: SafetyLimits) -> ExecutionContext {
        ExecutionContext::new(
            WorkflowId::new(),
            ExecutionId::from("exec-1"),
            json!({}),
            WorkflowMetadata::default().with_limits(limits),
        )
    }

    fn order_node(count: u32, price: u32, max_cost_cents: Option<u64>) -> Node {
        Node::action(
            "order",
            ActionConfig::PlaceOrder {
                market_ticker: "SOL-200".to_string(),
                side: OrderSide::Yes,
                count,
                limit_price_cents: price,
                max_cost_cents,
            },
        )
    }

    #[tokio::test]
    async fn send_sol_submits_lamports_and_records_signature() {
        let relay = Arc::new(RecordingRelay::default());
        let executor = ActionExecutor::new().with_transactions(relay.clone());
        let node = Node::action(
            "pay",
            ActionConfig::SendSol {
                to: "Recipient".to_string(),
                amount_sol: 0.25,
            },
        );
        let mut ctx = ctx(SafetyLimits::default());

        let output = executor.execute(&node, &mut ctx).await.expect("submitted");

        assert_eq!(output["signature"], "5sig");
        assert_eq!(ctx.variables[TX_SIGNATURE_VAR], "5sig");
        let submitted = relay.submitted.lock().expect("lock");
        assert_eq!(submitted[0].0, "exec-1:pay");
        assert_eq!(
            submitted[0].1,
            TransactionRequest::SolTransfer {
                to: "Recipient".to_string(),
                lamports: 250_000_000,
            }
        );
    }

    #[tokio::test]
    async fn send_sol_over_ceiling_is_rejected() {
        let relay = Arc::new(RecordingRelay::default());
        let executor = ActionExecutor::new().with_transactions(relay.clone());
        let node = Node::action(
            "pay",
            ActionConfig::SendSol {
                to: "Recipient".to_string(),
                amount_sol: 2.0,
            },
        );
        let mut ctx = ctx(SafetyLimits {
            max_sol_per_transaction: Some(1.0),
            ..SafetyLimits::default()
        });

        let err = executor.execute(&node, &mut ctx).await.unwrap_err();

        assert!(matches!(
            err.current_context(),
            ExecutionError::SafetyLimitExceeded { .. }
        ));
        assert!(relay.submitted.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn transfer_without_relay_is_not_configured() {
        let node = Node::action(
            "pay",
            ActionConfig::SendSplToken {
                to: "Recipient".to_string(),
                mint: "Mint".to_string(),
                amount: 10,
                decimals: Some(6),
            },
        );
        let mut ctx = ctx(SafetyLimits::default());

        let err = ActionExecutor::new()
            .execute(&node, &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            ExecutionError::NotConfigured { .. }
        ));
    }

    #[tokio::test]
    async fn order_is_placed_when_checks_pass() {
        let exchange = Arc::new(FakeExchange::open());
        let executor = ActionExecutor::new().with_orders(exchange.clone());
        let mut ctx = ctx(SafetyLimits::default());

        let output = executor
            .execute(&order_node(10, 40, Some(500)), &mut ctx)
            .await
            .expect("placed");

        assert_eq!(output["order_id"], "ord-1");
        assert_eq!(ctx.variables[ORDER_ID_VAR], "ord-1");
        let placed = exchange.placed.lock().expect("lock");
        assert_eq!(placed[0].client_order_id, "exec-1:order");
    }

    #[tokio::test]
    async fn order_over_per_order_ceiling_is_rejected() {
        let exchange = Arc::new(FakeExchange::open());
        let executor = ActionExecutor::new().with_orders(exchange.clone());
        let mut ctx = ctx(SafetyLimits::default());

        let err = executor
            .execute(&order_node(10, 60, Some(500)), &mut ctx)
            .await
            .unwrap_err();

        assert!(matches!(
            err.current_context(),
            ExecutionError::SafetyLimitExceeded { limit, .. } if limit == "max_cost_cents"
        ));
        assert!(exchange.placed.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn order_over_workflow_ceiling_is_rejected() {
        let exchange = Arc::new(FakeExchange::open());
        let executor = ActionExecutor::new().with_orders(exchange);
        let mut ctx = ctx(SafetyLimits {
            max_order_cost_cents: Some(100),
            ..SafetyLimits::default()
        });

        let err = executor
            .execute(&order_node(5, 50, None), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            ExecutionError::SafetyLimitExceeded { limit, .. } if limit == "max_order_cost_cents"
        ));
    }

    #[tokio::test]
    async fn closed_market_is_rejected() {
        let exchange = Arc::new(FakeExchange {
            market_status: Ok("closed"),
            ..FakeExchange::open()
        });
        let executor = ActionExecutor::new().with_orders(exchange.clone());
        let mut ctx = ctx(SafetyLimits::default());

        let err = executor
            .execute(&order_node(1, 50, None), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            ExecutionError::MarketClosed { .. }
        ));
        assert!(exchange.placed.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn failed_lookups_do_not_block_order() {
        let exchange = Arc::new(FakeExchange {
            market_status: Err(()),
            exposure: Err(()),
            placed: Mutex::new(Vec::new()),
        });
        let executor = ActionExecutor::new().with_orders(exchange.clone());
        let mut ctx = ctx(SafetyLimits {
            max_position_cents: Some(1_000),
            ..SafetyLimits::default()
        });

        executor
            .execute(&order_node(10, 50, None), &mut ctx)
            .await
            .expect("placed despite lookup failures");
        assert_eq!(exchange.placed.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn existing_exposure_counts_toward_position_ceiling() {
        let exchange = Arc::new(FakeExchange {
            exposure: Ok(Some(800)),
            ..FakeExchange::open()
        });
        let executor = ActionExecutor::new().with_orders(exchange);
        let mut ctx = ctx(SafetyLimits {
            max_position_cents: Some(1_000),
            ..SafetyLimits::default()
        });

        let err = executor
            .execute(&order_node(10, 50, None), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            ExecutionError::SafetyLimitExceeded { limit, .. } if limit == "max_position_cents"
        ));
    }

    #[tokio::test]
    async fn do_nothing_succeeds_without_collaborators() {
        let node = Node::action("noop", ActionConfig::DoNothing);
        let mut ctx = ctx(SafetyLimits::default());
        let output = ActionExecutor::new()
            .execute(&node, &mut ctx)
            .await
            .expect("noop");
        assert_eq!(output["action"], "do_nothing");
    }
}
