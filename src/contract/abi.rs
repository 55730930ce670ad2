//! WavePortal ABI: calldata encoding and decoding of return data and `NewWave` logs.
//!
//! `NewWave` is accepted both with an indexed sender (sender in `topics[1]`, timestamp and
//! message in `data`) and with all three fields in `data`.

use super::types::{AbiError, NewWaveLog, RawWave};

use ethers::abi::{ParamType, Token, decode, encode};
use ethers::types::{Address, Bytes, H256, Log, U256};
use ethers::utils::{id, keccak256};

pub const GET_ALL_WAVES_SIGNATURE: &str = "getAllWaves()";
pub const GET_TOTAL_WAVES_SIGNATURE: &str = "getTotalWaves()";
pub const WAVE_SIGNATURE: &str = "wave(string)";
pub const NEW_WAVE_EVENT_SIGNATURE: &str = "NewWave(address,uint256,string)";

fn calldata(signature: &str, args: &[Token]) -> Bytes {
	let mut data = id(signature).to_vec();
	data.extend(encode(args));
	data.into()
}

pub fn encode_get_all_waves() -> Bytes {
	calldata(GET_ALL_WAVES_SIGNATURE, &[])
}

pub fn encode_get_total_waves() -> Bytes {
	calldata(GET_TOTAL_WAVES_SIGNATURE, &[])
}

pub fn encode_wave(message: &str) -> Bytes {
	calldata(WAVE_SIGNATURE, &[Token::String(message.to_string())])
}

/// `topics[0]` of every `NewWave` log.
pub fn new_wave_topic() -> H256 {
	H256::from(keccak256(NEW_WAVE_EVENT_SIGNATURE))
}

fn wave_tuple() -> ParamType {
	ParamType::Tuple(vec![
		ParamType::Address,
		ParamType::Uint(256),
		ParamType::String,
	])
}

fn shape(what: &str) -> AbiError {
	AbiError::UnexpectedShape(what.to_string())
}

fn wave_from_tokens(tokens: Vec<Token>) -> Result<RawWave, AbiError> {
	let mut fields = tokens.into_iter();
	let waver = fields
		.next()
		.and_then(Token::into_address)
		.ok_or_else(|| shape("wave sender is not an address"))?;
	let timestamp = fields
		.next()
		.and_then(Token::into_uint)
		.ok_or_else(|| shape("wave timestamp is not a uint"))?;
	let message = fields
		.next()
		.and_then(Token::into_string)
		.ok_or_else(|| shape("wave message is not a string"))?;

	Ok(RawWave {
		waver,
		timestamp,
		message,
	})
}

/// Decode the return data of `getAllWaves()`.
pub fn decode_all_waves(data: &[u8]) -> Result<Vec<RawWave>, AbiError> {
	let tokens = decode(&[ParamType::Array(Box::new(wave_tuple()))], data)?;
	let entries = tokens
		.into_iter()
		.next()
		.and_then(Token::into_array)
		.ok_or_else(|| shape("getAllWaves did not return an array"))?;

	entries
		.into_iter()
		.map(|entry| {
			entry
				.into_tuple()
				.ok_or_else(|| shape("wave entry is not a tuple"))
				.and_then(wave_from_tokens)
		})
		.collect()
}

/// Decode the return data of `getTotalWaves()`.
pub fn decode_total_waves(data: &[u8]) -> Result<U256, AbiError> {
	decode(&[ParamType::Uint(256)], data)?
		.into_iter()
		.next()
		.and_then(Token::into_uint)
		.ok_or_else(|| shape("getTotalWaves did not return a uint"))
}

/// Decode a `NewWave` log.
pub fn decode_new_wave(log: &Log) -> Result<NewWaveLog, AbiError> {
	if log.topics.first() != Some(&new_wave_topic()) {
		return Err(shape("log is not a NewWave event"));
	}

	let wave = match log.topics.get(1) {
		Some(sender_topic) => {
			let waver = Address::from_slice(&sender_topic.as_bytes()[12..]);
			let mut tokens = vec![Token::Address(waver)];
			tokens.extend(decode(
				&[ParamType::Uint(256), ParamType::String],
				&log.data,
			)?);
			wave_from_tokens(tokens)?
		}
		None => wave_from_tokens(decode(
			&[ParamType::Address, ParamType::Uint(256), ParamType::String],
			&log.data,
		)?)?,
	};

	Ok(NewWaveLog {
		wave,
		tx_hash: log.transaction_hash,
		log_index: log.log_index,
		removed: log.removed.unwrap_or(false),
	})
}
