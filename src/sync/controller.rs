//! Connection lifecycle and state ownership.
//!
//! [`SyncController`] is the single writer of every piece of cross-cutting state: the connection,
//! the chain label, both balances, the event log and the draft message. It runs as an actor loop
//! that waits on four kinds of input at once:
//!
//! - commands from presentation, sent through a [`SyncHandle`];
//! - completions of provider calls it started, which run concurrently as futures;
//! - deliveries from the live `NewWave` subscription;
//! - account and chain change notifications from the wallet.
//!
//! Each input is handled to completion before the next one is taken, so appends to the
//! [`EventLog`] are serialised even while a wave transaction is being mined. After every input
//! a fresh [`Snapshot`] is published on a `watch` channel.

use super::event_log::EventLog;
use super::events::WaveEvent;
use super::snapshot::{
    BalanceSnapshot, ConnectionState, Notice, PayoutResult, SessionPhase, Snapshot, WaveOutcome,
};
use crate::chain::{ChainError, ChainInfo, ChainLink, Subscription};
use crate::contract::{ContractProxy, MinedWave, NewWaveLog, RawWave};

use ethers::types::{Address, U256};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};


/// Actions presentation can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Interactive connect (`eth_requestAccounts`).
    Connect,
    UpdateDraft(String),
    /// Store the message as the draft and submit it.
    SendWave(String),
    DismissNotice,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Sync controller has stopped")]
    ControllerStopped,
}

/// Cloneable front end to a running [`SyncController`].
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<Snapshot>,
}

impl SyncHandle {
    fn send(&self, command: Command) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::ControllerStopped)
    }

    pub fn connect(&self) -> Result<(), SyncError> {
        self.send(Command::Connect)
    }

    pub fn update_draft(&self, draft: impl Into<String>) -> Result<(), SyncError> {
        self.send(Command::UpdateDraft(draft.into()))
    }

    pub fn send_wave(&self, message: impl Into<String>) -> Result<(), SyncError> {
        self.send(Command::SendWave(message.into()))
    }

    pub fn dismiss_notice(&self) -> Result<(), SyncError> {
        self.send(Command::DismissNotice)
    }

    pub fn shutdown(&self) -> Result<(), SyncError> {
        self.send(Command::Shutdown)
    }

    /// A receiver that observes every published snapshot from now on.
    pub fn snapshots(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// The most recently published snapshot.
    pub fn current(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }
}

/// Everything the wave flow learned after the transaction was handed to the wallet.
struct WaveReport {
    mined: MinedWave,
    contract_balance: Result<U256, ChainError>,
    wallet_balance: Result<U256, ChainError>,
}

/// Result of an operation started by the controller.
enum Completion {
    Probed(Result<Vec<Address>, ChainError>),
    Connected(Result<Address, ChainError>),
    AccountWatch(Result<Subscription<Vec<Address>>, ChainError>),
    ChainWatch(Result<Subscription<u64>, ChainError>),
    /// Subscription registration followed by the full fetch for one session.
    Resynced {
        session: u64,
        subscription: Result<Subscription<NewWaveLog>, ChainError>,
        waves: Result<Vec<RawWave>, ChainError>,
    },
    ChainId(Result<u64, ChainError>),
    WalletBalance {
        account: Address,
        result: Result<U256, ChainError>,
    },
    ContractBalance(Result<U256, ChainError>),
    WaveFinished {
        account: Address,
        message: String,
        balance_before: Option<U256>,
        result: Result<WaveReport, ChainError>,
    },
}

/// Owner of the session state. Create with [`SyncController::new`] and drive with
/// [`SyncController::run`].
pub struct SyncController {
    chain: Arc<dyn ChainLink>,
    contract: Arc<dyn ContractProxy>,

    commands: mpsc::UnboundedReceiver<Command>,
    snapshots: watch::Sender<Snapshot>,
    pending: FuturesUnordered<BoxFuture<'static, Completion>>,

    phase: SessionPhase,
    /// Phase to return to when an interactive connect does not succeed.
    phase_before_connect: SessionPhase,
    connection: ConnectionState,
    chain_info: ChainInfo,
    contract_balance: Option<U256>,
    wallet_balance: Option<U256>,
    log: EventLog,
    draft_message: String,
    wave_in_flight: bool,
    last_wave: Option<WaveOutcome>,
    notice: Option<Notice>,

    /// Incremented whenever a session starts or ends; completions from older sessions are stale.
    session: u64,
    new_waves: Option<Subscription<NewWaveLog>>,
    account_changes: Option<Subscription<Vec<Address>>>,
    chain_changes: Option<Subscription<u64>>,
    torn_down: bool,
}

impl SyncController {
    pub fn new(chain: Arc<dyn ChainLink>, contract: Arc<dyn ContractProxy>) -> (Self, SyncHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());

        let controller = Self {
            chain,
            contract,
            commands: command_rx,
            snapshots: snapshot_tx,
            pending: FuturesUnordered::new(),
            phase: SessionPhase::Idle,
            phase_before_connect: SessionPhase::Idle,
            connection: ConnectionState::Disconnected,
            chain_info: ChainInfo::unknown(),
            contract_balance: None,
            wallet_balance: None,
            log: EventLog::new(),
            draft_message: String::new(),
            wave_in_flight: false,
            last_wave: None,
            notice: None,
            session: 0,
            new_waves: None,
            account_changes: None,
            chain_changes: None,
            torn_down: false,
        };
        let handle = SyncHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        };
        (controller, handle)
    }

    /// Run until [`Command::Shutdown`] is received or every handle is dropped, then release all
    /// subscriptions.
    pub async fn run(mut self) {
        self.start();
        self.publish();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(completion) = self.pending.next(), if !self.pending.is_empty() => {
                    self.on_completion(completion);
                }
                log = next_item(&mut self.new_waves) => match log {
                    Some(log) => self.on_new_wave(log),
                    None => closed_by_provider(&mut self.new_waves),
                },
                accounts = next_item(&mut self.account_changes) => match accounts {
                    Some(accounts) => self.on_accounts_changed(accounts),
                    None => closed_by_provider(&mut self.account_changes),
                },
                chain_id = next_item(&mut self.chain_changes) => match chain_id {
                    Some(chain_id) => self.on_chain_changed(chain_id),
                    None => closed_by_provider(&mut self.chain_changes),
                },
            }
            self.publish();
        }

        self.teardown();
        self.publish();
    }

    /// Release every subscription and drop in-flight operations. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if let Some(mut subscription) = self.new_waves.take() {
            subscription.unsubscribe();
        }
        if let Some(mut subscription) = self.account_changes.take() {
            subscription.unsubscribe();
        }
        if let Some(mut subscription) = self.chain_changes.take() {
            subscription.unsubscribe();
        }
        self.pending.clear();
        self.wave_in_flight = false;

        if !self.torn_down {
            self.torn_down = true;
            info!("Sync controller stopped");
        }
    }

    fn start(&mut self) {
        if !self.chain.is_available() {
            info!("No wallet provider found, staying idle");
            return;
        }

        info!("Wallet provider found, probing for authorised accounts");
        let chain = self.chain.clone();
        self.spawn(async move { Completion::ChainId(chain.current_chain_id().await) });
        self.refresh_contract_balance();

        let chain = self.chain.clone();
        self.spawn(async move { Completion::AccountWatch(chain.on_accounts_changed().await) });
        let chain = self.chain.clone();
        self.spawn(async move { Completion::ChainWatch(chain.on_chain_changed().await) });

        let chain = self.chain.clone();
        self.spawn(async move { Completion::Probed(chain.list_accounts().await) });
    }

    fn spawn<F>(&mut self, operation: F)
    where
        F: std::future::Future<Output = Completion> + Send + 'static,
    {
        self.pending.push(Box::pin(operation));
    }

    fn on_command(&mut self, command: Command) {
        debug!("Command: {:?}", command);
        match command {
            Command::Connect => self.connect(),
            Command::UpdateDraft(draft) => self.draft_message = draft,
            Command::SendWave(message) => self.send_wave(message),
            Command::DismissNotice => self.notice = None,
            Command::Shutdown => self.teardown(),
        }
    }

    fn connect(&mut self) {
        if !self.chain.is_available() {
            self.report("Connect", ChainError::NoWallet);
            return;
        }
        match self.phase {
            SessionPhase::Connected => {
                debug!("Already connected, ignoring connect request");
                return;
            }
            SessionPhase::Connecting => {
                debug!("Connect request already pending");
                return;
            }
            SessionPhase::Idle | SessionPhase::Disconnected => {}
        }

        self.phase_before_connect = self.phase;
        self.phase = SessionPhase::Connecting;
        let chain = self.chain.clone();
        self.spawn(async move { Completion::Connected(chain.request_accounts().await) });
    }

    fn send_wave(&mut self, message: String) {
        self.draft_message = message.clone();

        let Some(account) = self.connection.account() else {
            self.notice = Some(Notice::transient("Connect a wallet before waving"));
            return;
        };
        if self.wave_in_flight {
            self.notice = Some(Notice::transient("A wave is already being mined"));
            return;
        }

        self.wave_in_flight = true;
        info!("Sending wave from {:?}", account);

        let chain = self.chain.clone();
        let contract = self.contract.clone();
        let last_known_balance = self.contract_balance;
        self.spawn(async move {
            let balance_before = match contract.contract_balance().await {
                Ok(balance) => Some(balance),
                Err(e) => {
                    warn!("Could not read contract balance before waving: {}", e);
                    last_known_balance
                }
            };

            let result = async {
                let tx_hash = contract.send_wave(account, &message).await?;
                let mined = contract.wait_for_mined(tx_hash).await?;

                match contract.get_total_waves().await {
                    Ok(total) => info!("Retrieved total wave count... {}", total),
                    Err(e) => warn!("Could not read total wave count: {}", e),
                }

                Ok::<_, ChainError>(WaveReport {
                    mined,
                    contract_balance: contract.contract_balance().await,
                    wallet_balance: chain.get_balance(account).await,
                })
            }
            .await;

            Completion::WaveFinished {
                account,
                message,
                balance_before,
                result,
            }
        });
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Probed(Ok(accounts)) => match accounts.first() {
                Some(account) => {
                    info!("Found an authorised account: {:?}", account);
                    self.adopt_account(*account);
                }
                None => info!("No authorised account found"),
            },
            Completion::Probed(Err(e)) => self.report("Account probe", e),

            Completion::Connected(Ok(account)) => {
                info!("Connected {:?}", account);
                self.adopt_account(account);
            }
            Completion::Connected(Err(e)) => {
                if self.phase == SessionPhase::Connecting {
                    self.phase = self.phase_before_connect;
                }
                self.report("Connect", e);
            }

            Completion::AccountWatch(result) => match result {
                Ok(subscription) => self.account_changes = Some(subscription),
                Err(e) => warn!("Could not watch account changes: {}", e),
            },
            Completion::ChainWatch(result) => match result {
                Ok(subscription) => self.chain_changes = Some(subscription),
                Err(e) => warn!("Could not watch chain changes: {}", e),
            },

            Completion::Resynced {
                session,
                subscription,
                waves,
            } => self.on_resynced(session, subscription, waves),

            Completion::ChainId(Ok(chain_id)) => self.set_chain(chain_id),
            Completion::ChainId(Err(e)) => self.report("Chain lookup", e),

            Completion::WalletBalance { account, result } => {
                if self.connection.account() != Some(account) {
                    debug!("Dropping wallet balance of inactive account {:?}", account);
                    return;
                }
                match result {
                    Ok(balance) => self.wallet_balance = Some(balance),
                    Err(e) => self.report("Wallet balance refresh", e),
                }
            }
            Completion::ContractBalance(Ok(balance)) => self.contract_balance = Some(balance),
            Completion::ContractBalance(Err(e)) => self.report("Contract balance refresh", e),

            Completion::WaveFinished {
                account,
                message,
                balance_before,
                result,
            } => self.on_wave_finished(account, message, balance_before, result),
        }
    }

    /// Use `account` as the session account, starting a session if none is active.
    fn adopt_account(&mut self, account: Address) {
        match self.connection.account() {
            Some(current) if current == account => {
                self.phase = SessionPhase::Connected;
            }
            Some(current) => {
                info!("Switching account {:?} -> {:?}", current, account);
                self.connection = ConnectionState::Connected { account };
                self.phase = SessionPhase::Connected;
                self.wallet_balance = None;
                self.refresh_wallet_balance();
            }
            None => self.enter_connected(account),
        }
    }

    fn enter_connected(&mut self, account: Address) {
        self.session += 1;
        self.phase = SessionPhase::Connected;
        self.connection = ConnectionState::Connected { account };
        self.notice = None;
        if let Some(mut previous) = self.new_waves.take() {
            previous.unsubscribe();
        }
        info!("Session {} started for {:?}", self.session, account);

        // Subscribing before the fetch means no emission can fall between the two; deliveries
        // that overlap the fetch queue in the subscription and are deduplicated on append.
        let session = self.session;
        let contract = self.contract.clone();
        self.spawn(async move {
            let subscription = contract.subscribe_new_wave().await;
            let waves = contract.get_all_waves().await;
            Completion::Resynced {
                session,
                subscription,
                waves,
            }
        });

        self.refresh_wallet_balance();
        self.refresh_contract_balance();
        let chain = self.chain.clone();
        self.spawn(async move { Completion::ChainId(chain.current_chain_id().await) });
    }

    fn on_resynced(
        &mut self,
        session: u64,
        subscription: Result<Subscription<NewWaveLog>, ChainError>,
        waves: Result<Vec<RawWave>, ChainError>,
    ) {
        if session != self.session || self.phase != SessionPhase::Connected {
            debug!("Discarding resync of stale session {}", session);
            return;
        }

        match waves {
            Ok(waves) => {
                let loaded = self.log.load_initial(waves);
                info!("Loaded {} waves", loaded);
            }
            Err(e) => {
                if !self.log.is_empty() {
                    debug!("Keeping {} previously observed waves", self.log.len());
                }
                self.report("Loading waves", e);
            }
        }
        match subscription {
            Ok(subscription) => self.new_waves = Some(subscription),
            Err(e) => warn!("Live NewWave events unavailable: {}", e),
        }
    }

    fn on_new_wave(&mut self, log: NewWaveLog) {
        if log.removed {
            warn!("Ignoring NewWave log removed by a re-org: {:?}", log.tx_hash);
            return;
        }
        match WaveEvent::from_log(log) {
            Ok(event) => {
                info!("NewWave from {:?}: {}", event.sender, event.message);
                self.log.append(event);
            }
            Err(e) => warn!("Skipping live wave: {}", e),
        }
    }

    fn on_accounts_changed(&mut self, accounts: Vec<Address>) {
        debug!("Accounts changed: {:?}", accounts);
        match accounts.first() {
            Some(account) => self.adopt_account(*account),
            None => self.disconnect(),
        }
    }

    fn disconnect(&mut self) {
        if self.connection.account().is_none() {
            return;
        }
        info!("Wallet revoked every account, disconnecting");
        self.session += 1;
        self.phase = SessionPhase::Disconnected;
        self.connection = ConnectionState::Disconnected;
        self.wallet_balance = None;
        if let Some(mut subscription) = self.new_waves.take() {
            subscription.unsubscribe();
        }
    }

    fn on_chain_changed(&mut self, chain_id: u64) {
        self.set_chain(chain_id);
        if self.connection.account().is_some() {
            self.refresh_wallet_balance();
        }
    }

    fn set_chain(&mut self, chain_id: u64) {
        self.chain_info = ChainInfo::from_chain_id(chain_id);
        info!("Chain {} ({})", chain_id, self.chain_info.display_name);
    }

    fn on_wave_finished(
        &mut self,
        account: Address,
        message: String,
        balance_before: Option<U256>,
        result: Result<WaveReport, ChainError>,
    ) {
        self.wave_in_flight = false;

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                self.report("Wave", e);
                return;
            }
        };

        let balance_after = match report.contract_balance {
            Ok(balance) => {
                self.contract_balance = Some(balance);
                Some(balance)
            }
            Err(e) => {
                self.report("Contract balance refresh", e);
                None
            }
        };
        match report.wallet_balance {
            Ok(balance) if self.connection.account() == Some(account) => {
                self.wallet_balance = Some(balance)
            }
            Ok(_) => debug!("Dropping wallet balance of inactive account {:?}", account),
            Err(e) => self.report("Wallet balance refresh", e),
        }

        let payout = PayoutResult::classify(balance_before, balance_after);
        info!("Wave mined in {:?}: {:?}", report.mined.tx_hash, payout);
        self.last_wave = Some(WaveOutcome {
            tx_hash: report.mined.tx_hash,
            block_number: report.mined.block_number,
            payout,
            contract_balance_before: balance_before,
            contract_balance_after: balance_after,
        });

        // Edits made while the wave was mining are kept.
        if self.draft_message == message {
            self.draft_message.clear();
        }
    }

    fn refresh_wallet_balance(&mut self) {
        let Some(account) = self.connection.account() else {
            return;
        };
        let chain = self.chain.clone();
        self.spawn(async move {
            Completion::WalletBalance {
                account,
                result: chain.get_balance(account).await,
            }
        });
    }

    fn refresh_contract_balance(&mut self) {
        let contract = self.contract.clone();
        self.spawn(async move { Completion::ContractBalance(contract.contract_balance().await) });
    }

    /// Turn a failure into a log line or a notice. State is never rolled back here.
    fn report(&mut self, action: &str, error: ChainError) {
        match error {
            ChainError::NoWallet => {
                warn!("{}: {}", action, error);
                self.notice = Some(Notice::blocking(
                    "No wallet provider found. Configure a wallet to continue.",
                ));
            }
            ChainError::UserRejected => info!("{}: {}", action, error),
            _ => {
                warn!("{} failed: {}", action, error);
                self.notice = Some(Notice::transient(format!("{} failed: {}", action, error)));
            }
        }
    }

    fn render(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            connection: self.connection.clone(),
            chain: self.chain_info.clone(),
            balances: BalanceSnapshot::from_wei(self.contract_balance, self.wallet_balance),
            events: self.log.snapshot(),
            draft_message: self.draft_message.clone(),
            wave_in_flight: self.wave_in_flight,
            last_wave: self.last_wave.clone(),
            notice: self.notice.clone(),
        }
    }

    fn publish(&self) {
        let next = self.render();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Next delivery of an optional subscription; never resolves when there is none.
async fn next_item<T>(subscription: &mut Option<Subscription<T>>) -> Option<T> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

/// Drop a subscription whose provider side ended.
fn closed_by_provider<T>(slot: &mut Option<Subscription<T>>) {
    if let Some(subscription) = slot.take() {
        warn!("{} subscription closed by the provider", subscription.label());
    }
}
