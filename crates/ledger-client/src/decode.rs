//! Decoding of the packed binary layouts the ledger uses in its read call
//! responses.
//!
//! Auction data record (375 bytes):
//!
//! ```text
//! offset   0..32   auctioning token (32 byte word, address in last 20 bytes)
//! offset  32..64   bidding token
//! offset  64..352  nine u256 words:
//!                  order placement start (s), cancellation end (s),
//!                  auction end (s), auctioned sell amount, min buy amount,
//!                  min bid per order, min funding threshold, order count,
//!                  interim sum of bid amounts
//! offset 352..355  three booleans (one byte each):
//!                  settled, funding not reached, atomic closure
//! offset 355..375  auctioneer address (20 bytes, all zero = absent)
//! ```
//!
//! An all-zero auctioning token marks an id that was never assigned.
//!
//! Order book buffer: a u256 order count followed by 98 bytes per order:
//! buy amount (32) | sell amount (32) | user id (32) | cancelled (1) |
//! claimed (1). Order ids are implicit storage positions, dense and 0-based.

use {
    crate::UserId,
    alloy_primitives::{Address, U256},
};

/// Byte offset of the auctioneer address inside an auction data record:
/// 2 address words + 9 u256 words + 3 booleans packed before it.
pub const AUCTIONEER_OFFSET: usize = 355;

/// Total size of an auction data record.
pub const AUCTION_DATA_LEN: usize = AUCTIONEER_OFFSET + 20;

const WORD: usize = 32;
const ORDER_LEN: usize = WORD * 3 + 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("buffer too short: got {got} bytes, need {need}")]
    TooShort { got: usize, need: usize },
    /// The probed id has no auction behind it. Expected at the discovery
    /// frontier, not an anomaly.
    #[error("no auction at this id")]
    NoAuction,
    #[error("word {word} does not fit in u64")]
    ValueOverflow { word: usize },
    #[error("invalid boolean byte {value:#04x} at offset {offset}")]
    InvalidBool { offset: usize, value: u8 },
    #[error("order count {declared} does not match buffer of {got} bytes")]
    OrderCountMismatch { declared: u64, got: usize },
}

/// Decoded auction data record. Timestamps are in seconds, exactly as they
/// appear on the wire; the indexer converts to milliseconds on ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionData {
    pub auctioning_token: Address,
    pub bidding_token: Address,
    pub order_placement_start: u64,
    pub cancellation_end: u64,
    pub auction_end: u64,
    pub auctioned_sell_amount: U256,
    pub min_buy_amount: U256,
    pub min_bid_per_order: U256,
    pub min_funding_threshold: U256,
    pub order_count: u64,
    pub interim_sum_bid_amount: U256,
    pub settled: bool,
    pub funding_not_reached: bool,
    pub atomic_closure: bool,
    pub auctioneer: Option<Address>,
}

/// A single order as stored on the ledger. The owner is an internal user id
/// which has to be resolved to an address separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawOrder {
    pub buy_amount: U256,
    pub sell_amount: U256,
    pub user_id: UserId,
    pub cancelled: bool,
    pub claimed: bool,
}

/// Decodes a full auction data record.
pub fn decode_auction_data(raw: &[u8]) -> Result<AuctionData, DecodeError> {
    if raw.len() < AUCTION_DATA_LEN {
        return Err(DecodeError::TooShort {
            got: raw.len(),
            need: AUCTION_DATA_LEN,
        });
    }

    let auctioning_token = address_word(raw, 0);
    if auctioning_token == Address::ZERO {
        return Err(DecodeError::NoAuction);
    }

    Ok(AuctionData {
        auctioning_token,
        bidding_token: address_word(raw, 1),
        order_placement_start: u64_word(raw, 2)?,
        cancellation_end: u64_word(raw, 3)?,
        auction_end: u64_word(raw, 4)?,
        auctioned_sell_amount: word(raw, 5),
        min_buy_amount: word(raw, 6),
        min_bid_per_order: word(raw, 7),
        min_funding_threshold: word(raw, 8),
        order_count: u64_word(raw, 9)?,
        interim_sum_bid_amount: word(raw, 10),
        settled: boolean(raw, WORD * 11)?,
        funding_not_reached: boolean(raw, WORD * 11 + 1)?,
        atomic_closure: boolean(raw, WORD * 11 + 2)?,
        auctioneer: auctioneer_at_fixed_offset(raw),
    })
}

/// Extracts the auctioneer address at its fixed offset in the raw response.
///
/// This field is not part of the structured portion of the record, so it is
/// read straight out of the byte buffer. An all-zero address means the
/// ledger does not track an auctioneer for this auction.
pub fn auctioneer_at_fixed_offset(raw: &[u8]) -> Option<Address> {
    let bytes = raw.get(AUCTIONEER_OFFSET..AUCTIONEER_OFFSET + 20)?;
    let address = Address::from_slice(bytes);
    (address != Address::ZERO).then_some(address)
}

/// Decodes an order book buffer into orders, positionally indexed.
pub fn decode_order_book(raw: &[u8]) -> Result<Vec<RawOrder>, DecodeError> {
    if raw.len() < WORD {
        return Err(DecodeError::TooShort {
            got: raw.len(),
            need: WORD,
        });
    }
    let count = u64_word(raw, 0)?;
    let expected = WORD + (count as usize).saturating_mul(ORDER_LEN);
    if raw.len() != expected {
        return Err(DecodeError::OrderCountMismatch {
            declared: count,
            got: raw.len(),
        });
    }

    (0..count as usize)
        .map(|i| {
            let base = WORD + i * ORDER_LEN;
            Ok(RawOrder {
                buy_amount: U256::from_be_slice(&raw[base..base + WORD]),
                sell_amount: U256::from_be_slice(&raw[base + WORD..base + WORD * 2]),
                user_id: u64_at(raw, base + WORD * 2)?,
                cancelled: boolean(raw, base + WORD * 3)?,
                claimed: boolean(raw, base + WORD * 3 + 1)?,
            })
        })
        .collect()
}

fn word(raw: &[u8], index: usize) -> U256 {
    U256::from_be_slice(&raw[index * WORD..(index + 1) * WORD])
}

fn address_word(raw: &[u8], index: usize) -> Address {
    Address::from_slice(&raw[index * WORD + 12..(index + 1) * WORD])
}

fn u64_word(raw: &[u8], index: usize) -> Result<u64, DecodeError> {
    word(raw, index)
        .try_into()
        .map_err(|_| DecodeError::ValueOverflow { word: index })
}

fn u64_at(raw: &[u8], offset: usize) -> Result<u64, DecodeError> {
    U256::from_be_slice(&raw[offset..offset + WORD])
        .try_into()
        .map_err(|_| DecodeError::ValueOverflow { word: offset / WORD })
}

fn boolean(raw: &[u8], offset: usize) -> Result<bool, DecodeError> {
    match raw[offset] {
        0 => Ok(false),
        1 => Ok(true),
        value => Err(DecodeError::InvalidBool { offset, value }),
    }
}
