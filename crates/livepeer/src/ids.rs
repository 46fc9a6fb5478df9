//! Entity identifiers.
//!
//! Addresses always key entities in lowercase `0x` hex, never in their
//! checksummed display form.

use bondgraph_core::{Address, LogIndex, Timestamp, TxHash};

/// Denominator of every percentage expressed in parts-per-million.
pub const PERC_DIVISOR: u64 = 1_000_000;

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Left-pads `value` with zeros up to `size` characters.
pub fn left_pad(value: impl ToString, size: usize) -> String {
    format!("{:0>size$}", value.to_string())
}

pub fn address_id(address: &Address) -> String {
    format!("{address:#x}")
}

pub fn pool_id(transcoder: &Address, round: u64) -> String {
    format!("{}-{transcoder:#x}", left_pad(round, 10))
}

pub fn unbonding_lock_id(delegator: &Address, lock_id: u64) -> String {
    format!("{}-{delegator:#x}", left_pad(lock_id, 10))
}

pub fn vote_id(voter: &str, poll: &str) -> String {
    format!("{voter}-{poll}")
}

pub fn treasury_vote_id(proposal: &str, voter: &Address) -> String {
    format!("{proposal}-{voter:#x}")
}

pub fn event_id(tx: &TxHash, log_index: LogIndex) -> String {
    format!("{tx:#x}-{log_index}")
}

pub fn day_number(timestamp: Timestamp) -> u64 {
    timestamp / SECONDS_PER_DAY
}

pub fn day_start(timestamp: Timestamp) -> Timestamp {
    day_number(timestamp) * SECONDS_PER_DAY
}

pub fn day_bucket_id(address: &str, day: u64) -> String {
    format!("{address}-{day}")
}

/// Key of a poll watch; sequence-padded so that key order is registration
/// order.
pub fn watch_id(seq: u64) -> String {
    left_pad(seq, 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = last;
        Address::new(bytes)
    }

    #[test]
    fn pool_ids_sort_by_round() {
        let t = addr(1);
        let a = pool_id(&t, 9);
        let b = pool_id(&t, 10);

        assert_eq!(a, "0000000009-0x0000000000000000000000000000000000000001");
        assert!(a < b);
    }

    #[test]
    fn lock_id_pads_lock_number() {
        assert_eq!(
            unbonding_lock_id(&addr(2), 7),
            "0000000007-0x0000000000000000000000000000000000000002"
        );
    }

    #[test]
    fn event_id_joins_hash_and_index() {
        let tx = TxHash::repeat_byte(0xab);
        let id = event_id(&tx, 4);

        assert!(id.starts_with("0xabab"));
        assert!(id.ends_with("-4"));
    }

    #[test]
    fn days_bucket_by_utc_midnight() {
        assert_eq!(day_number(86_399), 0);
        assert_eq!(day_number(86_400), 1);
        assert_eq!(day_start(1_700_000_123), 1_699_920_000);
        assert_eq!(day_bucket_id("0xaa", 19675), "0xaa-19675");
    }

    #[test]
    fn address_ids_are_lowercase() {
        let address: Address = "0x52908400098527886E0F7030069857D2E4169EE7".parse().unwrap();

        assert_eq!(address_id(&address), "0x52908400098527886e0f7030069857d2e4169ee7");
        assert_eq!(
            treasury_vote_id("12", &address),
            "12-0x52908400098527886e0f7030069857d2e4169ee7"
        );
    }
}
