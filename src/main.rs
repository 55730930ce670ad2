use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use wave_portal_sync::chain::{ChainLink, JsonRpcChainLink};
use wave_portal_sync::config::ClientConfig;
use wave_portal_sync::contract::{ContractProxy, WavePortalContract};
use wave_portal_sync::sync::{ConnectionState, Snapshot, SyncController, SyncHandle};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive("wave_portal_sync=debug".parse().unwrap())
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting wave portal client");

	let config = match ClientConfig::from_env() {
		Ok(config) => config,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			return;
		}
	};

	let chain: Arc<dyn ChainLink> = match JsonRpcChainLink::new(&config) {
		Ok(chain) => Arc::new(chain),
		Err(e) => {
			error!("Failed to create wallet provider: {}", e);
			return;
		}
	};
	let contract: Arc<dyn ContractProxy> = Arc::new(WavePortalContract::new(
		chain.clone(),
		config.contract_address,
		config.gas_limit,
		config.poll_interval,
	));
	info!("Using WavePortal at {:?}", contract.address());

	let (controller, handle) = SyncController::new(chain, contract);
	let controller_task = tokio::spawn(controller.run());
	let render_task = tokio::spawn(render_snapshots(handle.clone()));

	print_help();
	read_commands(&handle).await;

	if handle.shutdown().is_ok() {
		match tokio::time::timeout(Duration::from_secs(5), controller_task).await {
			Ok(Ok(())) => {}
			Ok(Err(e)) => error!("Sync controller task failed: {}", e),
			Err(_) => warn!("Sync controller did not stop in time"),
		}
	}
	render_task.abort();
}

/// Forward console lines to the controller until `quit` or end of input.
async fn read_commands(handle: &SyncHandle) {
	let mut lines = BufReader::new(tokio::io::stdin()).lines();

	loop {
		let line = match lines.next_line().await {
			Ok(Some(line)) => line,
			Ok(None) => break,
			Err(e) => {
				error!("Failed to read input: {}", e);
				break;
			}
		};

		let line = line.trim();
		let (command, argument) = line.split_once(' ').unwrap_or((line, ""));
		let sent = match command {
			"" => continue,
			"connect" => handle.connect(),
			"wave" => handle.send_wave(argument.trim()),
			"draft" => handle.update_draft(argument.trim()),
			"dismiss" => handle.dismiss_notice(),
			"show" => {
				print_snapshot(&handle.current());
				continue;
			}
			"quit" | "exit" => break,
			other => {
				println!("Unknown command: {}", other);
				print_help();
				continue;
			}
		};

		if let Err(e) = sent {
			error!("{}", e);
			break;
		}
	}
}

async fn render_snapshots(handle: SyncHandle) {
	let mut snapshots = handle.snapshots();
	while snapshots.changed().await.is_ok() {
		let snapshot = snapshots.borrow_and_update().clone();
		print_snapshot(&snapshot);
	}
}

fn print_help() {
	println!("Commands: connect | wave <message> | draft <text> | dismiss | show | quit");
}

fn print_snapshot(snapshot: &Snapshot) {
	let account = match &snapshot.connection {
		ConnectionState::Connected { account } => format!("{:?}", account),
		ConnectionState::Disconnected => "not connected".to_string(),
	};

	println!("----------------------------------------");
	println!("{:?} | {} | {}", snapshot.phase, account, snapshot.chain.display_name);
	println!(
		"Contract balance: {} ETH | Wallet balance: {} ETH",
		snapshot.balances.contract_balance, snapshot.balances.wallet_balance
	);
	if snapshot.wave_in_flight {
		println!("Mining...");
	}
	if let Some(outcome) = &snapshot.last_wave {
		println!("Last wave {:?}: {:?}", outcome.tx_hash, outcome.payout);
	}
	if let Some(notice) = &snapshot.notice {
		println!("[{:?}] {}", notice.severity, notice.message);
	}
	if !snapshot.draft_message.is_empty() {
		println!("Draft: {}", snapshot.draft_message);
	}

	println!("{} waves", snapshot.events.len());
	for event in &snapshot.events {
		println!(
			"  {} {:?}: {}",
			event.timestamp.format("%Y-%m-%d %H:%M:%S"),
			event.sender,
			event.message
		);
	}
}
