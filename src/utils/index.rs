use ethers::types::U256;

/// Decimals of the native token (ether).
pub const ETHER_DECIMALS: u32 = 18;

/// Format a wei amount as ether with trailing zeros removed, e.g. `0.04` or `12`.
pub fn format_ether(wei: U256) -> String {
    let unit = U256::exp10(ETHER_DECIMALS as usize);
    let whole = wei / unit;
    let fraction = wei % unit;
    if fraction.is_zero() {
        return whole.to_string();
    }

    let digits = format!("{:0>width$}", fraction.to_string(), width = ETHER_DECIMALS as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Format a wei amount as ether rounded half-up to `places` decimals, e.g. `0.04000`.
pub fn format_ether_fixed(wei: U256, places: u32) -> String {
    let places = places.min(ETHER_DECIMALS);
    let step = U256::exp10((ETHER_DECIMALS - places) as usize);
    let rounded = wei.saturating_add(step / 2) / step;

    if places == 0 {
        return rounded.to_string();
    }

    let scale = U256::exp10(places as usize);
    format!(
        "{}.{:0>width$}",
        rounded / scale,
        (rounded % scale).to_string(),
        width = places as usize
    )
}
