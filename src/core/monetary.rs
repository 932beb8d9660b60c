//! Monetary units
//!
//! Values are counted in satoshis. One coin is 100,000,000 satoshis and
//! every block mints a fixed reward through its coinbase.

/// Number of satoshis in one coin
pub const SATOSHIS_PER_COIN: u64 = 100_000_000;

/// Fixed reward carried by every coinbase (50 coins)
pub const BLOCK_REWARD: u64 = 50 * SATOSHIS_PER_COIN;

/// Format satoshis as a human-readable coin amount
///
/// # Examples
/// ```
/// use hoji::core::monetary::format_satoshis;
/// assert_eq!(format_satoshis(100_000_000), "1.00000000 coins");
/// assert_eq!(format_satoshis(1_000), "0.00001000 coins");
/// ```
pub fn format_satoshis(satoshis: u64) -> String {
    format!(
        "{}.{:08} coins",
        satoshis / SATOSHIS_PER_COIN,
        satoshis % SATOSHIS_PER_COIN
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reward_splits_evenly() {
        assert_eq!(BLOCK_REWARD % 2, 0);
        assert_eq!(BLOCK_REWARD, 5_000_000_000);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_satoshis(BLOCK_REWARD), "50.00000000 coins");
        assert_eq!(format_satoshis(SATOSHIS_PER_COIN / 2), "0.50000000 coins");
        assert_eq!(format_satoshis(0), "0.00000000 coins");
    }
}
