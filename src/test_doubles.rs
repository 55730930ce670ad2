//! In-memory stand-ins for the wallet and the contract.

use crate::chain::{ChainError, ChainLink, ReceiptStatus, Subscription, TransactionCall};
use crate::contract::{ContractProxy, MinedWave, NewWaveLog, RawWave};

use ethers::types::{Address, Bytes, H256, Log, U256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc};

/// Convert milli-ether to wei.
pub fn milli_ether(milli: u64) -> U256 {
    U256::from(milli) * U256::exp10(15)
}

/// Keep only the senders whose subscription is still open and send `item` to them.
fn broadcast<T: Clone>(senders: &mut Vec<mpsc::UnboundedSender<T>>, item: T) {
    senders.retain(|sender| sender.send(item.clone()).is_ok());
}

fn open_count<T>(senders: &mut Vec<mpsc::UnboundedSender<T>>) -> usize {
    senders.retain(|sender| !sender.is_closed());
    senders.len()
}

#[derive(Default)]
struct ChainState {
    accounts: Vec<Address>,
    /// Overrides the result of `request_accounts`; by default the first account is returned.
    request_result: Option<Result<Address, ChainError>>,
    request_calls: usize,
    list_calls: usize,
    chain_id: u64,
    balances: HashMap<Address, U256>,
    balance_error: Option<ChainError>,
    call_results: HashMap<Vec<u8>, Vec<u8>>,
    sent: Vec<TransactionCall>,
    receipts: VecDeque<Option<ReceiptStatus>>,
    log_senders: Vec<mpsc::UnboundedSender<Log>>,
    account_senders: Vec<mpsc::UnboundedSender<Vec<Address>>>,
    chain_senders: Vec<mpsc::UnboundedSender<u64>>,
}

/// Scriptable [`ChainLink`].
pub struct FakeChainLink {
    available: AtomicBool,
    state: Mutex<ChainState>,
}

impl FakeChainLink {
    pub fn with_accounts(accounts: Vec<Address>) -> Self {
        Self {
            available: AtomicBool::new(true),
            state: Mutex::new(ChainState {
                accounts,
                chain_id: 4,
                ..Default::default()
            }),
        }
    }

    /// A host without any wallet provider.
    pub fn unavailable() -> Self {
        let chain = Self::with_accounts(vec![]);
        chain.available.store(false, Ordering::SeqCst);
        chain
    }

    /// Hash assigned to the `n`th transaction sent through this link, counting from 1.
    pub fn tx_hash(n: u64) -> H256 {
        H256::from_low_u64_be(n)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().expect("fake chain state lock")
    }

    fn ensure_available(&self) -> Result<(), ChainError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChainError::NoWallet)
        }
    }

    pub fn set_request_result(&self, result: Result<Address, ChainError>) {
        self.state().request_result = Some(result);
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state().balances.insert(address, balance);
    }

    /// Make every `get_balance` read fail with `error`.
    pub fn fail_balance(&self, error: ChainError) {
        self.state().balance_error = Some(error);
    }

    pub fn set_call_result(&self, calldata: Bytes, result: Vec<u8>) {
        self.state().call_results.insert(calldata.to_vec(), result);
    }

    /// Queue the next receipt lookup result. With an empty queue every lookup succeeds.
    pub fn push_receipt(&self, receipt: Option<ReceiptStatus>) {
        self.state().receipts.push_back(receipt);
    }

    pub fn request_calls(&self) -> usize {
        self.state().request_calls
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    /// Open account and chain change subscriptions.
    pub fn watchers(&self) -> usize {
        let mut state = self.state();
        open_count(&mut state.account_senders) + open_count(&mut state.chain_senders)
    }

    /// Open `subscribe_logs` registrations.
    pub fn log_subscribers(&self) -> usize {
        open_count(&mut self.state().log_senders)
    }

    pub fn sent_transactions(&self) -> Vec<TransactionCall> {
        self.state().sent.clone()
    }

    pub fn emit_log(&self, log: Log) {
        broadcast(&mut self.state().log_senders, log);
    }

    /// Simulate the wallet changing its authorised account list.
    pub fn emit_accounts(&self, accounts: Vec<Address>) {
        let mut state = self.state();
        state.accounts = accounts.clone();
        broadcast(&mut state.account_senders, accounts);
    }

    /// Simulate the wallet switching network.
    pub fn emit_chain(&self, chain_id: u64) {
        let mut state = self.state();
        state.chain_id = chain_id;
        broadcast(&mut state.chain_senders, chain_id);
    }
}

#[async_trait::async_trait]
impl ChainLink for FakeChainLink {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn request_accounts(&self) -> Result<Address, ChainError> {
        self.ensure_available()?;
        let mut state = self.state();
        state.request_calls += 1;
        match state.request_result.clone() {
            Some(result) => result,
            None => state
                .accounts
                .first()
                .copied()
                .ok_or_else(|| ChainError::Provider("no accounts".to_string())),
        }
    }

    async fn list_accounts(&self) -> Result<Vec<Address>, ChainError> {
        self.ensure_available()?;
        let mut state = self.state();
        state.list_calls += 1;
        Ok(state.accounts.clone())
    }

    async fn current_chain_id(&self) -> Result<u64, ChainError> {
        self.ensure_available()?;
        Ok(self.state().chain_id)
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.ensure_available()?;
        let state = self.state();
        if let Some(error) = state.balance_error.clone() {
            return Err(error);
        }
        Ok(state
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn call(&self, _to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        self.ensure_available()?;
        self.state()
            .call_results
            .get(&data.to_vec())
            .cloned()
            .map(Bytes::from)
            .ok_or_else(|| ChainError::Provider("execution reverted".to_string()))
    }

    async fn send_transaction(&self, call: TransactionCall) -> Result<H256, ChainError> {
        self.ensure_available()?;
        let mut state = self.state();
        state.sent.push(call);
        Ok(Self::tx_hash(state.sent.len() as u64))
    }

    async fn transaction_status(&self, tx_hash: H256) -> Result<Option<ReceiptStatus>, ChainError> {
        self.ensure_available()?;
        Ok(self.state().receipts.pop_front().unwrap_or(Some(ReceiptStatus {
            tx_hash,
            block_number: Some(1),
            succeeded: true,
        })))
    }

    async fn subscribe_logs(
        &self,
        _address: Address,
        _topic: H256,
    ) -> Result<Subscription<Log>, ChainError> {
        self.ensure_available()?;
        let (sender, subscription) = Subscription::channel("logs");
        self.state().log_senders.push(sender);
        Ok(subscription)
    }

    async fn on_accounts_changed(&self) -> Result<Subscription<Vec<Address>>, ChainError> {
        self.ensure_available()?;
        let (sender, subscription) = Subscription::channel("accountsChanged");
        self.state().account_senders.push(sender);
        Ok(subscription)
    }

    async fn on_chain_changed(&self) -> Result<Subscription<u64>, ChainError> {
        self.ensure_available()?;
        let (sender, subscription) = Subscription::channel("chainChanged");
        self.state().chain_senders.push(sender);
        Ok(subscription)
    }
}

/// A gate that operations can be held at until the test releases them.
#[derive(Default)]
struct Gate {
    closed: AtomicBool,
    release: Notify,
}

impl Gate {
    async fn pass(&self) {
        if self.closed.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
        self.release.notify_one();
    }
}

#[derive(Default)]
struct ContractState {
    waves: Vec<RawWave>,
    all_waves_calls: usize,
    all_waves_error: Option<ChainError>,
    subscribe_calls: usize,
    balance: U256,
    balance_error: Option<ChainError>,
    balance_after_wave: Option<U256>,
    send_error: Option<ChainError>,
    mine_error: Option<ChainError>,
    /// Waves sent but not yet mined, by transaction hash.
    submitted: HashMap<H256, RawWave>,
    sent: u64,
    wave_senders: Vec<mpsc::UnboundedSender<NewWaveLog>>,
}

/// Scriptable [`ContractProxy`] holding its waves in memory.
///
/// A successful `wait_for_mined` records the wave and emits it on every live subscription, the
/// way a real node would emit `NewWave` for the mined transaction.
#[derive(Default)]
pub struct FakeContract {
    state: Mutex<ContractState>,
    mining: Gate,
    all_waves: Gate,
}

impl FakeContract {
    pub fn with_waves(waves: Vec<RawWave>) -> Self {
        let contract = Self::default();
        contract.state().waves = waves;
        contract
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ContractState> {
        self.state.lock().expect("fake contract state lock")
    }

    pub fn set_balance(&self, balance: U256) {
        self.state().balance = balance;
    }

    /// Contract balance once the next wave is mined.
    pub fn set_balance_after_wave(&self, balance: U256) {
        self.state().balance_after_wave = Some(balance);
    }

    /// Make every `contract_balance` read fail with `error`.
    pub fn fail_balance(&self, error: ChainError) {
        self.state().balance_error = Some(error);
    }

    pub fn fail_all_waves(&self, error: ChainError) {
        self.state().all_waves_error = Some(error);
    }

    pub fn fail_send(&self, error: ChainError) {
        self.state().send_error = Some(error);
    }

    pub fn fail_mining(&self, error: ChainError) {
        self.state().mine_error = Some(error);
    }

    /// Hold `wait_for_mined` until [`FakeContract::release_mining`].
    pub fn hold_mining(&self) {
        self.mining.close();
    }

    pub fn release_mining(&self) {
        self.mining.open();
    }

    /// Hold `get_all_waves` until [`FakeContract::release_all_waves`].
    pub fn hold_all_waves(&self) {
        self.all_waves.close();
    }

    pub fn release_all_waves(&self) {
        self.all_waves.open();
    }

    pub fn all_waves_calls(&self) -> usize {
        self.state().all_waves_calls
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state().subscribe_calls
    }

    /// Live subscriptions that have not been released.
    pub fn live_subscribers(&self) -> usize {
        open_count(&mut self.state().wave_senders)
    }

    /// Record a wave mined by someone else in transaction `tx` and emit it live.
    pub fn emit_wave(&self, wave: RawWave, tx: u64) {
        let mut state = self.state();
        state.waves.push(wave.clone());
        let log = NewWaveLog {
            wave,
            tx_hash: Some(H256::from_low_u64_be(tx)),
            log_index: Some(U256::zero()),
            removed: false,
        };
        broadcast(&mut state.wave_senders, log);
    }

    /// End every live subscription from the provider side.
    pub fn close_subscriptions(&self) {
        self.state().wave_senders.clear();
    }

    /// Emit a live log without recording it.
    pub fn emit_log(&self, log: NewWaveLog) {
        broadcast(&mut self.state().wave_senders, log);
    }
}

#[async_trait::async_trait]
impl ContractProxy for FakeContract {
    fn address(&self) -> Address {
        Address::repeat_byte(0xcc)
    }

    async fn get_all_waves(&self) -> Result<Vec<RawWave>, ChainError> {
        self.state().all_waves_calls += 1;
        self.all_waves.pass().await;
        let state = self.state();
        match &state.all_waves_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.waves.clone()),
        }
    }

    async fn get_total_waves(&self) -> Result<U256, ChainError> {
        Ok(U256::from(self.state().waves.len()))
    }

    async fn send_wave(&self, from: Address, message: &str) -> Result<H256, ChainError> {
        let mut state = self.state();
        if let Some(error) = state.send_error.clone() {
            return Err(error);
        }
        state.sent += 1;
        let tx_hash = H256::from_low_u64_be(10_000 + state.sent);
        let timestamp = U256::from(1_700_000_000u64 + state.sent);
        state.submitted.insert(
            tx_hash,
            RawWave {
                waver: from,
                timestamp,
                message: message.to_string(),
            },
        );
        Ok(tx_hash)
    }

    async fn wait_for_mined(&self, tx_hash: H256) -> Result<MinedWave, ChainError> {
        self.mining.pass().await;

        let mut state = self.state();
        if let Some(error) = state.mine_error.clone() {
            return Err(error);
        }
        let wave = state
            .submitted
            .remove(&tx_hash)
            .ok_or_else(|| ChainError::Provider("unknown transaction".to_string()))?;
        if let Some(balance) = state.balance_after_wave.take() {
            state.balance = balance;
        }

        state.waves.push(wave.clone());
        let log = NewWaveLog {
            wave,
            tx_hash: Some(tx_hash),
            log_index: Some(U256::zero()),
            removed: false,
        };
        broadcast(&mut state.wave_senders, log);

        Ok(MinedWave {
            tx_hash,
            block_number: Some(state.waves.len() as u64),
        })
    }

    async fn subscribe_new_wave(&self) -> Result<Subscription<NewWaveLog>, ChainError> {
        let (sender, subscription) = Subscription::channel("NewWave");
        let mut state = self.state();
        state.subscribe_calls += 1;
        state.wave_senders.push(sender);
        Ok(subscription)
    }

    async fn contract_balance(&self) -> Result<U256, ChainError> {
        let state = self.state();
        match &state.balance_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.balance),
        }
    }
}
