//! Execution plan builder

use alloy_primitives::{Address, Bytes, I256, U256};
use alloy_sol_types::{sol, SolCall};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use dexarb_core::{
    to_signed, ExchangeAdapter, ExchangeId, ExecutionConfig, ExecutionPlan, FlashLoanInstruction,
    FlashLoanProvider, MevProtection, Opportunity, PlanError, Step, SwapInstruction,
};

sol! {
    /// Receiver contract run inside the flash-loan callback
    interface IArbitrageExecutor {
        struct SwapCall {
            address target;
            uint256 value;
            bytes callData;
        }

        function executeArbitrage(SwapCall[] calldata calls, address profitToken, uint256 minProfit) external;
    }
}

/// Extra gas for the loan wrapper around the swaps
const FLASH_LOAN_GAS_OVERHEAD: u64 = 100_000;

/// Turns an opportunity into provider-facing transactions
pub struct PlanBuilder {
    exchanges: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>>,
    flash_loans: Vec<Arc<dyn FlashLoanProvider>>,
    config: ExecutionConfig,
}

impl PlanBuilder {
    pub fn new(exchanges: Vec<Arc<dyn ExchangeAdapter>>, config: ExecutionConfig) -> Self {
        Self {
            exchanges: exchanges.into_iter().map(|e| (e.id(), e)).collect(),
            flash_loans: Vec::new(),
            config,
        }
    }

    pub fn with_flash_loan_provider(mut self, provider: Arc<dyn FlashLoanProvider>) -> Self {
        self.flash_loans.push(provider);
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Slippage floor for a quoted output; zero once slippage reaches 100%
    pub fn min_amount_out(&self, amount_out: U256) -> U256 {
        let bps = U256::from(10_000u64.saturating_sub(self.config.slippage_bps as u64));
        amount_out * bps / U256::from(10_000u64)
    }

    /// Unix timestamp after which swaps revert
    pub fn deadline(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64 + self.config.deadline_seconds
    }

    /// Build the plan for one execution attempt
    ///
    /// `target_block` is set when a relay will carry the bundle; MEV
    /// protection is only attached in that case.
    pub async fn build(
        &self,
        opp: &Opportunity,
        target_block: Option<u64>,
    ) -> Result<ExecutionPlan, PlanError> {
        let deadline = self.deadline();

        let loan = if opp.requires_flash_loan {
            self.select_provider(opp.route.start_token(), opp.route.amount_in()).await
        } else {
            None
        };
        let recipient = match (&loan, self.config.flash_loan_contract) {
            (Some(_), Some(contract)) => contract,
            _ => self.config.recipient,
        };

        let mut swaps = Vec::with_capacity(opp.route.len());
        for (index, step) in opp.route.steps().iter().enumerate() {
            swaps.push(self.build_swap(index, step, recipient, deadline).await?);
        }

        let flash_loan = match loan {
            Some((provider, fee_fraction)) => {
                Some(self.build_flash_loan(opp, &swaps, provider, fee_fraction).await?)
            }
            None => None,
        };

        let mev_protection = match target_block {
            Some(block) if opp.requires_mev_protection => Some(MevProtection { target_block: block }),
            _ => None,
        };

        debug!(
            "Built plan for {}: {} swaps, flash loan: {}, deadline {}",
            opp.id,
            swaps.len(),
            flash_loan.is_some(),
            deadline
        );

        Ok(ExecutionPlan {
            opportunity_id: opp.id.clone(),
            swaps,
            flash_loan,
            mev_protection,
            deadline,
        })
    }

    async fn build_swap(
        &self,
        index: usize,
        step: &Step,
        recipient: Address,
        deadline: u64,
    ) -> Result<SwapInstruction, PlanError> {
        let adapter = self
            .exchanges
            .get(&step.exchange)
            .ok_or_else(|| PlanError::UnknownExchange(step.exchange.clone()))?;

        let min_amount_out = self.min_amount_out(step.amount_out);
        let transaction = match &step.path {
            Some(path) if step.is_multi_hop() => {
                adapter
                    .build_multi_hop_swap_transaction(path, &[step.amount_in, min_amount_out], recipient, deadline)
                    .await
            }
            _ => {
                adapter
                    .build_swap_transaction(
                        step.token_in,
                        step.token_out,
                        step.amount_in,
                        min_amount_out,
                        recipient,
                        deadline,
                    )
                    .await
            }
        }
        .map_err(|source| PlanError::StepBuild {
            step: index,
            exchange: step.exchange.clone(),
            source,
        })?;

        Ok(SwapInstruction {
            step_index: index,
            exchange: step.exchange.clone(),
            min_amount_out,
            transaction,
        })
    }

    /// First provider that lends `token` in the requested size
    async fn select_provider(
        &self,
        token: Address,
        amount: U256,
    ) -> Option<(Arc<dyn FlashLoanProvider>, f64)> {
        if self.config.flash_loan_contract.is_none() {
            warn!("Flash loan requested but no receiver contract configured, executing without");
            return None;
        }

        for provider in &self.flash_loans {
            let supported = match provider.supported_tokens().await {
                Ok(tokens) => tokens.contains(&token),
                Err(e) => {
                    warn!("Flash loan provider {} unavailable: {}", provider.name(), e);
                    continue;
                }
            };
            if !supported {
                continue;
            }
            match provider.max_loan_amount(token).await {
                Ok(max) if max >= amount => {}
                Ok(max) => {
                    debug!("{} max loan {} below {}", provider.name(), max, amount);
                    continue;
                }
                Err(e) => {
                    warn!("Flash loan provider {} unavailable: {}", provider.name(), e);
                    continue;
                }
            }
            match provider.fee_percentage(token).await {
                Ok(fee) => return Some((provider.clone(), fee)),
                Err(e) => warn!("Flash loan provider {} unavailable: {}", provider.name(), e),
            }
        }

        warn!("No flash loan provider for {} of {}, executing without", amount, token);
        None
    }

    async fn build_flash_loan(
        &self,
        opp: &Opportunity,
        swaps: &[SwapInstruction],
        provider: Arc<dyn FlashLoanProvider>,
        fee_fraction: f64,
    ) -> Result<FlashLoanInstruction, PlanError> {
        let token = opp.route.start_token();
        let amount = opp.route.amount_in();
        let fee = flash_loan_fee(amount, fee_fraction);

        let expected = opp.profit_native - to_signed(fee);
        let min_profit = if expected > I256::ZERO { expected.into_raw() } else { U256::ZERO };
        let callback = encode_callback(swaps, token, min_profit);

        let contract = self.config.flash_loan_contract.unwrap_or(self.config.recipient);
        let mut transaction = provider
            .prepare_flash_loan(token, amount, contract, callback)
            .await?;
        let swap_gas: u64 = swaps.iter().map(|s| s.transaction.gas_limit).sum();
        transaction.gas_limit = transaction.gas_limit.max(swap_gas + FLASH_LOAN_GAS_OVERHEAD);

        debug!("Flash loan via {}: {} of {}, fee {}", provider.name(), amount, token, fee);
        Ok(FlashLoanInstruction { token, amount, fee, transaction })
    }
}

/// ABI-encoded `executeArbitrage` call carrying the swap transactions
pub fn encode_callback(swaps: &[SwapInstruction], profit_token: Address, min_profit: U256) -> Bytes {
    let calls = swaps
        .iter()
        .map(|s| IArbitrageExecutor::SwapCall {
            target: s.transaction.to,
            value: s.transaction.value,
            callData: s.transaction.data.clone(),
        })
        .collect();
    let call = IArbitrageExecutor::executeArbitrageCall {
        calls,
        profitToken: profit_token,
        minProfit: min_profit,
    };
    Bytes::from(call.abi_encode())
}

/// Fee on `amount`, with the fraction rounded to parts per million
pub fn flash_loan_fee(amount: U256, fee_fraction: f64) -> U256 {
    let ppm = (fee_fraction * 1_000_000.0).round();
    if !(ppm > 0.0) {
        return U256::ZERO;
    }
    amount.saturating_mul(U256::from(ppm as u64)) / U256::from(1_000_000u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dexarb_core::{AdapterError, AdapterResult, FlashLoanError, Route, TransactionRequest};

    const ONE: u128 = 1_000_000_000_000_000_000;

    fn token(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    struct Router {
        name: &'static str,
        multi_hop: bool,
        fail: bool,
    }

    #[async_trait]
    impl ExchangeAdapter for Router {
        fn id(&self) -> ExchangeId {
            ExchangeId::new(self.name)
        }
        async fn supports_token(&self, _t: Address) -> bool {
            true
        }
        async fn get_amount_out(&self, _a: Address, _b: Address, amount: U256) -> AdapterResult<U256> {
            Ok(amount)
        }
        async fn estimate_swap_gas(&self, _a: Address, _b: Address, _amount: U256) -> AdapterResult<u64> {
            Ok(100_000)
        }
        async fn get_pairs_for_token(&self, _t: Address) -> AdapterResult<Vec<(Address, Address)>> {
            Ok(vec![])
        }
        async fn build_swap_transaction(
            &self,
            token_in: Address,
            _token_out: Address,
            amount_in: U256,
            min_amount_out: U256,
            recipient: Address,
            _deadline: u64,
        ) -> AdapterResult<TransactionRequest> {
            if self.fail {
                return Err(AdapterError::Unknown("router offline".into()));
            }
            let mut data = token_in.to_vec();
            data.extend_from_slice(&amount_in.to_be_bytes::<32>());
            data.extend_from_slice(&min_amount_out.to_be_bytes::<32>());
            Ok(TransactionRequest { to: recipient, data: data.into(), value: U256::ZERO, gas_limit: 150_000 })
        }
        fn supports_multi_hop(&self) -> bool {
            self.multi_hop
        }
        async fn build_multi_hop_swap_transaction(
            &self,
            path: &[Address],
            amounts: &[U256],
            recipient: Address,
            _deadline: u64,
        ) -> AdapterResult<TransactionRequest> {
            if !self.multi_hop {
                return Err(AdapterError::Unsupported {
                    exchange: self.id(),
                    operation: "build_multi_hop_swap_transaction".into(),
                });
            }
            let data: Vec<u8> = path.iter().flat_map(|a| a.to_vec()).collect();
            Ok(TransactionRequest {
                to: recipient,
                data: data.into(),
                value: amounts[0],
                gas_limit: 250_000,
            })
        }
    }

    struct Lender {
        max: U256,
    }

    #[async_trait]
    impl FlashLoanProvider for Lender {
        fn name(&self) -> &str {
            "lender"
        }
        async fn supported_tokens(&self) -> Result<Vec<Address>, FlashLoanError> {
            Ok(vec![token(1)])
        }
        async fn fee_percentage(&self, _t: Address) -> Result<f64, FlashLoanError> {
            Ok(0.0009)
        }
        async fn max_loan_amount(&self, _t: Address) -> Result<U256, FlashLoanError> {
            Ok(self.max)
        }
        async fn prepare_flash_loan(
            &self,
            _token: Address,
            _amount: U256,
            target_contract: Address,
            callback_data: Bytes,
        ) -> Result<TransactionRequest, FlashLoanError> {
            Ok(TransactionRequest { to: target_contract, data: callback_data, value: U256::ZERO, gas_limit: 0 })
        }
    }

    fn adapters(fail: bool) -> Vec<Arc<dyn ExchangeAdapter>> {
        vec![
            Arc::new(Router { name: "x", multi_hop: false, fail }),
            Arc::new(Router { name: "y", multi_hop: true, fail: false }),
        ]
    }

    fn opportunity() -> Opportunity {
        let steps = vec![
            Step::new("x".into(), token(1), token(2), U256::from(ONE), U256::from(2_000 * ONE), 100_000),
            Step::new("y".into(), token(2), token(1), U256::from(2_000 * ONE), U256::from(ONE + ONE / 50), 100_000),
        ];
        Opportunity::new(Route::from_steps(token(1), U256::from(ONE), U256::ZERO, steps).unwrap())
    }

    #[tokio::test]
    async fn test_min_out_applies_slippage() {
        let builder = PlanBuilder::new(adapters(false), ExecutionConfig::default());
        let plan = builder.build(&opportunity(), None).await.unwrap();

        assert_eq!(plan.swaps.len(), 2);
        assert_eq!(plan.swaps[0].min_amount_out, U256::from(1_980 * ONE));
        assert_eq!(plan.swaps[1].step_index, 1);
        assert!(plan.flash_loan.is_none());
        assert!(plan.deadline >= chrono::Utc::now().timestamp() as u64 + 299);
    }

    #[test]
    fn test_min_out_floors_at_zero_past_full_slippage() {
        for slippage_bps in [10_000, 20_000, u16::MAX] {
            let config = ExecutionConfig { slippage_bps, ..Default::default() };
            let builder = PlanBuilder::new(vec![], config);
            assert_eq!(builder.min_amount_out(U256::from(ONE)), U256::ZERO);
        }
    }

    #[tokio::test]
    async fn test_mev_protection_only_with_target_block() {
        let builder = PlanBuilder::new(adapters(false), ExecutionConfig::default());
        let without = builder.build(&opportunity(), None).await.unwrap();
        assert!(without.mev_protection.is_none());

        let with = builder.build(&opportunity(), Some(101)).await.unwrap();
        assert_eq!(with.mev_protection.map(|m| m.target_block), Some(101));
    }

    #[tokio::test]
    async fn test_multi_hop_step_uses_path_builder() {
        let mut opp = opportunity();
        let step = Step::new("y".into(), token(1), token(1), U256::from(ONE), U256::from(ONE + ONE / 50), 250_000)
            .with_path(vec![token(1), token(3), token(1)]);
        opp.route = Route::from_steps(token(1), U256::from(ONE), U256::ZERO, vec![step]).unwrap();

        let builder = PlanBuilder::new(adapters(false), ExecutionConfig::default());
        let plan = builder.build(&opp, None).await.unwrap();
        assert_eq!(plan.swaps[0].transaction.gas_limit, 250_000);
    }

    #[tokio::test]
    async fn test_multi_hop_unsupported_fails_plan() {
        let mut opp = opportunity();
        let step = Step::new("x".into(), token(1), token(1), U256::from(ONE), U256::from(ONE + ONE / 50), 250_000)
            .with_path(vec![token(1), token(3), token(1)]);
        opp.route = Route::from_steps(token(1), U256::from(ONE), U256::ZERO, vec![step]).unwrap();

        let builder = PlanBuilder::new(adapters(false), ExecutionConfig::default());
        let err = builder.build(&opp, None).await.unwrap_err();
        assert!(matches!(err, PlanError::StepBuild { step: 0, .. }));
    }

    #[tokio::test]
    async fn test_step_failure_names_step() {
        let builder = PlanBuilder::new(adapters(true), ExecutionConfig::default());
        match builder.build(&opportunity(), None).await.unwrap_err() {
            PlanError::StepBuild { step, exchange, .. } => {
                assert_eq!(step, 0);
                assert_eq!(exchange.as_str(), "x");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_exchange() {
        let builder = PlanBuilder::new(vec![], ExecutionConfig::default());
        let err = builder.build(&opportunity(), None).await.unwrap_err();
        assert_eq!(err, PlanError::UnknownExchange(ExchangeId::new("x")));
    }

    #[tokio::test]
    async fn test_flash_loan_wraps_swaps() {
        let contract = token(0xfe);
        let config = ExecutionConfig { flash_loan_contract: Some(contract), ..Default::default() };
        let builder = PlanBuilder::new(adapters(false), config)
            .with_flash_loan_provider(Arc::new(Lender { max: U256::from(10 * ONE) }));
        let mut opp = opportunity();
        opp.requires_flash_loan = true;

        let plan = builder.build(&opp, None).await.unwrap();
        let loan = plan.flash_loan.as_ref().unwrap();
        assert_eq!(loan.fee, U256::from(ONE * 9 / 10_000));
        assert_eq!(plan.transactions().len(), 1);
        assert!(loan.transaction.gas_limit >= 300_000 + FLASH_LOAN_GAS_OVERHEAD);
        assert!(plan.swaps.iter().all(|s| s.transaction.to == contract));

        let decoded = IArbitrageExecutor::executeArbitrageCall::abi_decode(&loan.transaction.data, true).unwrap();
        assert_eq!(decoded.calls.len(), 2);
        assert_eq!(decoded.profitToken, token(1));
        assert_eq!(decoded.calls[1].callData, plan.swaps[1].transaction.data);
    }

    #[tokio::test]
    async fn test_flash_loan_skipped_when_too_large() {
        let config = ExecutionConfig { flash_loan_contract: Some(token(0xfe)), ..Default::default() };
        let builder = PlanBuilder::new(adapters(false), config)
            .with_flash_loan_provider(Arc::new(Lender { max: U256::from(ONE / 2) }));
        let mut opp = opportunity();
        opp.requires_flash_loan = true;

        let plan = builder.build(&opp, None).await.unwrap();
        assert!(plan.flash_loan.is_none());
        assert_eq!(plan.transactions().len(), 2);
    }
}
