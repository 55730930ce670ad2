use super::abi;
use super::types::{MinedWave, NewWaveLog};
use crate::chain::{ChainError, ChainLink, Subscription, TransactionCall};
use crate::contract::RawWave;

use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Typed surface over the deployed WavePortal contract
#[async_trait::async_trait]
pub trait ContractProxy: Send + Sync {
	/// Address the proxy is bound to.
	fn address(&self) -> Address;

	/// Every wave recorded on chain, in contract order.
	async fn get_all_waves(&self) -> Result<Vec<RawWave>, ChainError>;

	async fn get_total_waves(&self) -> Result<U256, ChainError>;

	/// Submit a `wave(message)` transaction from `from`. Resolves once the wallet has broadcast
	/// it; use [`ContractProxy::wait_for_mined`] for confirmation.
	async fn send_wave(&self, from: Address, message: &str) -> Result<H256, ChainError>;

	/// Wait, without a timeout, until `tx_hash` is mined.
	async fn wait_for_mined(&self, tx_hash: H256) -> Result<MinedWave, ChainError>;

	/// Live `NewWave` events. Emissions before the subscription is active are not delivered.
	async fn subscribe_new_wave(&self) -> Result<Subscription<NewWaveLog>, ChainError>;

	/// Ether held by the contract, in wei.
	async fn contract_balance(&self) -> Result<U256, ChainError>;
}

/// [`ContractProxy`] that encodes calls with the WavePortal ABI and sends them through a
/// [`ChainLink`].
pub struct WavePortalContract {
	chain: Arc<dyn ChainLink>,
	address: Address,
	gas_limit: u64,
	poll_interval: Duration,
}

impl WavePortalContract {
	pub fn new(
		chain: Arc<dyn ChainLink>,
		address: Address,
		gas_limit: u64,
		poll_interval: Duration,
	) -> Self {
		Self {
			chain,
			address,
			gas_limit,
			poll_interval,
		}
	}
}

#[async_trait::async_trait]
impl ContractProxy for WavePortalContract {
	fn address(&self) -> Address {
		self.address
	}

	async fn get_all_waves(&self) -> Result<Vec<RawWave>, ChainError> {
		let data = self
			.chain
			.call(self.address, abi::encode_get_all_waves())
			.await?;
		let waves = abi::decode_all_waves(&data)?;
		debug!("Fetched {} waves from contract", waves.len());
		Ok(waves)
	}

	async fn get_total_waves(&self) -> Result<U256, ChainError> {
		let data = self
			.chain
			.call(self.address, abi::encode_get_total_waves())
			.await?;
		Ok(abi::decode_total_waves(&data)?)
	}

	async fn send_wave(&self, from: Address, message: &str) -> Result<H256, ChainError> {
		let data = abi::encode_wave(message);
		debug!("wave calldata: 0x{}", hex::encode(&data));

		let tx_hash = self
			.chain
			.send_transaction(TransactionCall {
				from,
				to: self.address,
				data,
				gas_limit: self.gas_limit,
			})
			.await?;
		info!("Mining... {:?}", tx_hash);
		Ok(tx_hash)
	}

	async fn wait_for_mined(&self, tx_hash: H256) -> Result<MinedWave, ChainError> {
		loop {
			match self.chain.transaction_status(tx_hash).await? {
				Some(status) if status.succeeded => {
					info!("Mined -- {:?}", tx_hash);
					return Ok(MinedWave {
						tx_hash,
						block_number: status.block_number,
					});
				}
				Some(_) => {
					return Err(ChainError::TransactionFailed(format!(
						"transaction {:?} reverted",
						tx_hash
					)));
				}
				None => tokio::time::sleep(self.poll_interval).await,
			}
		}
	}

	async fn subscribe_new_wave(&self) -> Result<Subscription<NewWaveLog>, ChainError> {
		let mut logs = self
			.chain
			.subscribe_logs(self.address, abi::new_wave_topic())
			.await?;

		let (sender, subscription) = Subscription::channel("NewWave");
		// Dropping `logs` when this task ends releases the provider subscription.
		let worker = tokio::spawn(async move {
			while let Some(log) = logs.next().await {
				match abi::decode_new_wave(&log) {
					Ok(wave) => {
						if sender.send(wave).is_err() {
							break;
						}
					}
					Err(e) => warn!("Skipping undecodable NewWave log: {}", e),
				}
			}
		});

		Ok(subscription.with_worker(worker.abort_handle()))
	}

	async fn contract_balance(&self) -> Result<U256, ChainError> {
		self.chain.get_balance(self.address).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::ReceiptStatus;
	use crate::test_doubles::FakeChainLink;
	use ethers::abi::{Token, encode};
	use ethers::types::Log;

	fn contract(chain: Arc<FakeChainLink>) -> WavePortalContract {
		WavePortalContract::new(
			chain,
			Address::repeat_byte(0xcc),
			300_000,
			Duration::from_millis(1),
		)
	}

	#[tokio::test]
	async fn send_wave_applies_gas_ceiling() {
		let chain = Arc::new(FakeChainLink::with_accounts(vec![]));
		let proxy = contract(chain.clone());
		let from = Address::repeat_byte(1);

		let hash = proxy.send_wave(from, "hello").await.expect("broadcast");

		let sent = chain.sent_transactions();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].from, from);
		assert_eq!(sent[0].to, Address::repeat_byte(0xcc));
		assert_eq!(sent[0].gas_limit, 300_000);
		assert_eq!(sent[0].data, abi::encode_wave("hello"));
		assert_eq!(hash, FakeChainLink::tx_hash(1));
	}

	#[tokio::test]
	async fn get_all_waves_decodes_call_result() {
		let chain = Arc::new(FakeChainLink::with_accounts(vec![]));
		chain.set_call_result(
			abi::encode_get_all_waves(),
			encode(&[Token::Array(vec![Token::Tuple(vec![
				Token::Address(Address::repeat_byte(2)),
				Token::Uint(U256::from(10)),
				Token::String("hey".to_string()),
			])])]),
		);

		let waves = contract(chain).get_all_waves().await.expect("decoded");
		assert_eq!(
			waves,
			vec![RawWave {
				waver: Address::repeat_byte(2),
				timestamp: U256::from(10),
				message: "hey".to_string(),
			}]
		);
	}

	#[tokio::test]
	async fn undecodable_call_result_is_a_provider_error() {
		let chain = Arc::new(FakeChainLink::with_accounts(vec![]));
		chain.set_call_result(abi::encode_get_total_waves(), vec![1, 2, 3]);

		let err = contract(chain).get_total_waves().await.expect_err("garbage");
		assert!(matches!(err, ChainError::Provider(_)));
	}

	#[tokio::test]
	async fn wait_for_mined_polls_until_receipt() {
		let chain = Arc::new(FakeChainLink::with_accounts(vec![]));
		let hash = H256::repeat_byte(5);
		chain.push_receipt(None);
		chain.push_receipt(Some(ReceiptStatus {
			tx_hash: hash,
			block_number: Some(12),
			succeeded: true,
		}));

		let mined = contract(chain).wait_for_mined(hash).await.expect("mined");
		assert_eq!(mined.block_number, Some(12));
	}

	#[tokio::test]
	async fn reverted_receipt_is_transaction_failure() {
		let chain = Arc::new(FakeChainLink::with_accounts(vec![]));
		let hash = H256::repeat_byte(6);
		chain.push_receipt(Some(ReceiptStatus {
			tx_hash: hash,
			block_number: Some(3),
			succeeded: false,
		}));

		let err = contract(chain).wait_for_mined(hash).await.expect_err("reverted");
		assert!(matches!(err, ChainError::TransactionFailed(_)));
	}

	#[tokio::test]
	async fn new_wave_subscription_decodes_logs_and_resubscribes() {
		let chain = Arc::new(FakeChainLink::with_accounts(vec![]));
		let proxy = contract(chain.clone());
		let mut waves = proxy.subscribe_new_wave().await.expect("subscribed");

		chain.emit_log(Log {
			topics: vec![abi::new_wave_topic()],
			data: encode(&[
				Token::Address(Address::repeat_byte(4)),
				Token::Uint(U256::from(99)),
				Token::String("live".to_string()),
			])
			.into(),
			..Default::default()
		});

		let wave = waves.next().await.expect("delivered");
		assert_eq!(wave.wave.message, "live");

		waves.unsubscribe();
		waves.unsubscribe();
		assert!(waves.next().await.is_none());

		let mut again = proxy.subscribe_new_wave().await.expect("subscribed again");
		for _ in 0..10 {
			tokio::task::yield_now().await;
		}
		assert_eq!(chain.log_subscribers(), 1);

		chain.emit_log(Log {
			topics: vec![abi::new_wave_topic()],
			data: encode(&[
				Token::Address(Address::repeat_byte(5)),
				Token::Uint(U256::from(100)),
				Token::String("after resubscribe".to_string()),
			])
			.into(),
			..Default::default()
		});

		let wave = again.next().await.expect("delivered once");
		assert_eq!(wave.wave.message, "after resubscribe");
		for _ in 0..10 {
			tokio::task::yield_now().await;
		}
		assert!(again.try_next().is_none());
		assert!(waves.try_next().is_none());
	}
}
