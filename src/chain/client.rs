//!
//! JSON-RPC wallet provider for EIP-1193 compatible wallets.
//!
//! This module provides [`JsonRpcChainLink`], the production [`ChainLink`]. Requests go over HTTP
//! with `reqwest`; change notifications and contract logs use `eth_subscribe` over a WebSocket
//! when one is configured. Without a WebSocket endpoint, account and chain changes are detected
//! by polling.

use super::link::{ChainLink, ReceiptStatus, Subscription, TransactionCall};
use super::types::ChainError;
use crate::config::ClientConfig;

use ethers::types::{Address, Bytes, H256, Log, U64, U256};
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// EIP-1193 "User Rejected Request".
pub const USER_REJECTED_CODE: i64 = 4001;
/// Error code used by nodes for `execution reverted`.
pub const EXECUTION_REVERTED_CODE: i64 = 3;

/// Error types for provider transport and JSON-RPC responses
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
	#[error("JSON-RPC error {code}: {message}")]
	Rpc { code: i64, message: String },

	#[error("No result returned for {0}")]
	NoResult(String),

	#[error("Unexpected value: {0}")]
	UnexpectedValue(String),

	#[error("WebSocket error: {0}")]
	WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("Subscription error: {0}")]
	SubscriptionError(String),
}

impl From<RpcError> for ChainError {
	fn from(error: RpcError) -> Self {
		match error {
			RpcError::Rpc {
				code: USER_REJECTED_CODE,
				..
			} => ChainError::UserRejected,
			other => ChainError::Provider(other.to_string()),
		}
	}
}

/// Classify a failure of `eth_sendTransaction`.
fn transaction_error(error: RpcError) -> ChainError {
	match error {
		RpcError::Rpc {
			code: USER_REJECTED_CODE,
			..
		} => ChainError::TransactionRejected,
		RpcError::Rpc {
			code: EXECUTION_REVERTED_CODE,
			message,
		} => ChainError::TransactionFailed(message),
		RpcError::Rpc { message, .. } if message.contains("revert") || message.contains("gas") => {
			ChainError::TransactionFailed(message)
		}
		other => ChainError::Provider(other.to_string()),
	}
}

/// Interpret the HTTP reply to a JSON-RPC request.
///
/// A JSON-RPC error object in the body wins over the HTTP status, so a wallet that answers a
/// rejection with a 4xx still reports the rejection code.
fn parse_http_response(method: &str, status: StatusCode, body: &str) -> Result<Value, RpcError> {
	let parsed = serde_json::from_str::<Value>(body);
	if status.is_success() {
		return parse_response(method, parsed?);
	}

	match parsed {
		Ok(response) if response.get("error").is_some_and(|e| !e.is_null()) => {
			parse_response(method, response)
		}
		_ => Err(RpcError::UnexpectedValue(format!(
			"HTTP status {} for {}",
			status, method
		))),
	}
}

/// Extract `result` from a JSON-RPC response object, turning `error` into [`RpcError::Rpc`].
fn parse_response(method: &str, mut response: Value) -> Result<Value, RpcError> {
	if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
		let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-32603);
		let message = error
			.get("message")
			.and_then(|m| m.as_str())
			.unwrap_or("Unknown provider error")
			.to_string();
		return Err(RpcError::Rpc { code, message });
	}

	response
		.get_mut("result")
		.map(Value::take)
		.ok_or_else(|| RpcError::NoResult(method.to_string()))
}

/// Parse a JSON-RPC quantity (`"0x89"`, `"137"` or `137`) into a `u64`.
fn parse_quantity(value: Value) -> Result<u64, RpcError> {
	match &value {
		Value::Number(n) => n
			.as_u64()
			.ok_or_else(|| RpcError::UnexpectedValue(value.to_string())),
		Value::String(s) => {
			let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
				Some(hex_digits) => u64::from_str_radix(hex_digits, 16),
				None => s.parse::<u64>(),
			};
			parsed.map_err(|_| RpcError::UnexpectedValue(s.clone()))
		}
		_ => Err(RpcError::UnexpectedValue(value.to_string())),
	}
}

fn parse_accounts(value: Value) -> Result<Vec<Address>, RpcError> {
	Ok(serde_json::from_value(value)?)
}

fn parse_log(value: Value) -> Result<Log, RpcError> {
	Ok(serde_json::from_value(value)?)
}

/// Extract the payload of an `eth_subscription` notification addressed to `subscription_id`.
///
/// Returns `Ok(None)` for any other message on the socket.
fn parse_notification(text: &str, subscription_id: &str) -> Result<Option<Value>, RpcError> {
	let mut parsed: Value = serde_json::from_str(text)?;
	if parsed.get("method").and_then(|m| m.as_str()) != Some("eth_subscription") {
		return Ok(None);
	}

	let Some(params) = parsed.get_mut("params") else {
		return Err(RpcError::SubscriptionError(
			"Notification missing params".to_string(),
		));
	};
	if params.get("subscription").and_then(|s| s.as_str()) != Some(subscription_id) {
		return Ok(None);
	}

	params
		.get_mut("result")
		.map(Value::take)
		.map(Some)
		.ok_or_else(|| RpcError::SubscriptionError("Notification missing result".to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
	transaction_hash: H256,
	block_number: Option<U64>,
	/// Absent on pre-Byzantium chains.
	status: Option<U64>,
}

impl From<RawReceipt> for ReceiptStatus {
	fn from(receipt: RawReceipt) -> Self {
		Self {
			tx_hash: receipt.transaction_hash,
			block_number: receipt.block_number.map(|b| b.as_u64()),
			succeeded: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(true),
		}
	}
}

/// Methods that wait on the user and are therefore sent without a request timeout.
const INTERACTIVE_METHODS: [&str; 2] = ["eth_requestAccounts", "eth_sendTransaction"];

/// Connection details for a configured wallet.
#[derive(Clone)]
struct Endpoint {
	/// HTTP client for reads, bounded by the configured request timeout.
	http_client: Client,
	/// HTTP client for requests that wait on a wallet prompt.
	interactive_client: Client,
	/// HTTP JSON-RPC endpoint of the wallet.
	rpc_url: String,
	/// WebSocket endpoint for `eth_subscribe`, if the wallet exposes one.
	ws_url: Option<String>,
	/// Interval used for change polling.
	poll_interval: Duration,
	next_id: Arc<AtomicU64>,
}

impl Endpoint {
	fn next_request_id(&self) -> u64 {
		self.next_id.fetch_add(1, Ordering::Relaxed)
	}

	/// Execute a JSON-RPC request and return its `result`.
	async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": self.next_request_id(),
			"method": method,
			"params": params,
		});
		debug!("-> {} {}", method, request_body["params"]);

		let client = if INTERACTIVE_METHODS.contains(&method) {
			&self.interactive_client
		} else {
			&self.http_client
		};
		let response = client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		let status = response.status();
		let body = response.text().await?;
		parse_http_response(method, status, &body)
	}

	async fn request_as<T: DeserializeOwned>(
		&self,
		method: &str,
		params: Value,
	) -> Result<T, RpcError> {
		let result = self.request(method, params).await?;
		Ok(serde_json::from_value(result)?)
	}

	/// Open a WebSocket, issue `eth_subscribe` with `params` and forward matching
	/// notifications, parsed with `parse`, into a [`Subscription`].
	async fn ws_subscribe<T>(
		&self,
		label: &'static str,
		params: Value,
		parse: fn(Value) -> Result<T, RpcError>,
	) -> Result<Subscription<T>, RpcError>
	where
		T: Send + 'static,
	{
		let ws_url = self.ws_url.as_deref().ok_or_else(|| {
			RpcError::SubscriptionError("No WebSocket endpoint configured".to_string())
		})?;

		debug!("Attempting WebSocket connection to: {}", ws_url);
		let (ws_stream, response) = connect_async(ws_url).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		let request_id = self.next_request_id();
		let subscribe_message = json!({
			"jsonrpc": "2.0",
			"id": request_id,
			"method": "eth_subscribe",
			"params": params,
		});
		ws_sender
			.send(Message::Text(subscribe_message.to_string()))
			.await?;

		// Wait for the subscription id
		let subscription_id = loop {
			let Some(msg) = ws_receiver.next().await else {
				return Err(RpcError::SubscriptionError(
					"Socket closed before subscription was confirmed".to_string(),
				));
			};
			if let Message::Text(text) = msg? {
				let parsed: Value = serde_json::from_str(&text)?;
				if parsed.get("id").and_then(|id| id.as_u64()) != Some(request_id) {
					continue;
				}
				let result = parse_response("eth_subscribe", parsed)?;
				let id = result.as_str().ok_or_else(|| {
					RpcError::SubscriptionError(format!("Invalid subscription id: {}", result))
				})?;
				break id.to_string();
			}
		};
		info!("Subscribed to {} with id {}", label, subscription_id);

		let (sender, subscription) = Subscription::channel(label);
		let next_id = self.next_id.clone();
		let worker = tokio::spawn(async move {
			while let Some(msg) = ws_receiver.next().await {
				match msg {
					Ok(Message::Text(text)) => match parse_notification(&text, &subscription_id) {
						Ok(Some(payload)) => match parse(payload) {
							Ok(item) => {
								if sender.send(item).is_err() {
									break;
								}
							}
							Err(e) => warn!("Failed to decode {} notification: {}", label, e),
						},
						Ok(None) => {}
						Err(e) => warn!("Malformed message on {} socket: {}", label, e),
					},
					Ok(Message::Close(_)) => {
						info!("{} socket closed by provider", label);
						break;
					}
					Ok(_) => {}
					Err(e) => {
						error!("Error in {} subscription: {}", label, e);
						break;
					}
				}
			}

			let unsubscribe_message = json!({
				"jsonrpc": "2.0",
				"id": next_id.fetch_add(1, Ordering::Relaxed),
				"method": "eth_unsubscribe",
				"params": [subscription_id],
			});
			if let Err(e) = ws_sender
				.send(Message::Text(unsubscribe_message.to_string()))
				.await
			{
				debug!("Could not send eth_unsubscribe for {}: {}", label, e);
			}
		});

		Ok(subscription.with_worker(worker.abort_handle()))
	}

	/// Poll `method` at the configured interval and emit its value whenever it changes.
	///
	/// The first successful response is the baseline and is not emitted.
	fn poll_changes<T>(
		&self,
		label: &'static str,
		method: &'static str,
		parse: fn(Value) -> Result<T, RpcError>,
	) -> Subscription<T>
	where
		T: PartialEq + Clone + Send + 'static,
	{
		let endpoint = self.clone();
		let (sender, subscription) = Subscription::channel(label);

		let worker = tokio::spawn(async move {
			let mut last_seen: Option<T> = None;
			let mut ticker = tokio::time::interval(endpoint.poll_interval);
			loop {
				ticker.tick().await;
				let current = match endpoint.request(method, json!([])).await.and_then(parse) {
					Ok(value) => value,
					Err(e) => {
						debug!("Polling {} failed: {}", method, e);
						continue;
					}
				};

				if last_seen.as_ref() == Some(&current) {
					continue;
				}
				if last_seen.is_some() && sender.send(current.clone()).is_err() {
					break;
				}
				last_seen = Some(current);
			}
		});

		subscription.with_worker(worker.abort_handle())
	}
}

/// [`ChainLink`] backed by a wallet's JSON-RPC interface.
#[derive(Clone)]
pub struct JsonRpcChainLink {
	endpoint: Option<Endpoint>,
}

impl JsonRpcChainLink {
	/// Create a provider from configuration.
	///
	/// # Returns
	/// An unavailable provider when no wallet RPC URL is configured, otherwise a provider bound
	/// to that URL. Fails only if the HTTP client cannot be built.
	pub fn new(config: &ClientConfig) -> Result<Self, RpcError> {
		let Some(rpc_url) = config.wallet_rpc_url.clone() else {
			return Ok(Self::unavailable());
		};

		let http_client = Client::builder().timeout(config.request_timeout).build()?;
		let interactive_client = Client::builder().build()?;

		Ok(Self {
			endpoint: Some(Endpoint {
				http_client,
				interactive_client,
				rpc_url,
				ws_url: config.wallet_ws_url.clone(),
				poll_interval: config.poll_interval,
				next_id: Arc::new(AtomicU64::new(1)),
			}),
		})
	}

	/// A provider that reports no wallet; every call fails with [`ChainError::NoWallet`].
	pub fn unavailable() -> Self {
		Self { endpoint: None }
	}

	fn endpoint(&self) -> Result<&Endpoint, ChainError> {
		self.endpoint.as_ref().ok_or(ChainError::NoWallet)
	}
}

#[async_trait::async_trait]
impl ChainLink for JsonRpcChainLink {
	fn is_available(&self) -> bool {
		self.endpoint.is_some()
	}

	async fn request_accounts(&self) -> Result<Address, ChainError> {
		let accounts = self
			.endpoint()?
			.request("eth_requestAccounts", json!([]))
			.await
			.and_then(parse_accounts)?;

		accounts
			.into_iter()
			.next()
			.ok_or_else(|| ChainError::Provider("Wallet returned no accounts".to_string()))
	}

	async fn list_accounts(&self) -> Result<Vec<Address>, ChainError> {
		Ok(self
			.endpoint()?
			.request("eth_accounts", json!([]))
			.await
			.and_then(parse_accounts)?)
	}

	async fn current_chain_id(&self) -> Result<u64, ChainError> {
		Ok(self
			.endpoint()?
			.request("eth_chainId", json!([]))
			.await
			.and_then(parse_quantity)?)
	}

	async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
		Ok(self
			.endpoint()?
			.request_as("eth_getBalance", json!([address, "latest"]))
			.await?)
	}

	async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
		Ok(self
			.endpoint()?
			.request_as("eth_call", json!([{ "to": to, "data": data }, "latest"]))
			.await?)
	}

	async fn send_transaction(&self, call: TransactionCall) -> Result<H256, ChainError> {
		let params = json!([{
			"from": call.from,
			"to": call.to,
			"data": call.data,
			"gas": format!("{:#x}", call.gas_limit),
		}]);

		self.endpoint()?
			.request_as("eth_sendTransaction", params)
			.await
			.map_err(transaction_error)
	}

	async fn transaction_status(&self, tx_hash: H256) -> Result<Option<ReceiptStatus>, ChainError> {
		let receipt: Option<RawReceipt> = self
			.endpoint()?
			.request_as("eth_getTransactionReceipt", json!([tx_hash]))
			.await?;
		Ok(receipt.map(ReceiptStatus::from))
	}

	async fn subscribe_logs(
		&self,
		address: Address,
		topic: H256,
	) -> Result<Subscription<Log>, ChainError> {
		let params = json!(["logs", { "address": address, "topics": [topic] }]);
		Ok(self
			.endpoint()?
			.ws_subscribe("contract logs", params, parse_log)
			.await?)
	}

	async fn on_accounts_changed(&self) -> Result<Subscription<Vec<Address>>, ChainError> {
		let endpoint = self.endpoint()?;
		if endpoint.ws_url.is_none() {
			return Ok(endpoint.poll_changes("accounts", "eth_accounts", parse_accounts));
		}
		Ok(endpoint
			.ws_subscribe("accounts", json!(["accountsChanged"]), parse_accounts)
			.await?)
	}

	async fn on_chain_changed(&self) -> Result<Subscription<u64>, ChainError> {
		let endpoint = self.endpoint()?;
		if endpoint.ws_url.is_none() {
			return Ok(endpoint.poll_changes("chain", "eth_chainId", parse_quantity));
		}
		Ok(endpoint
			.ws_subscribe("chain", json!(["chainChanged"]), parse_quantity)
			.await?)
	}
}
