//! On-chain order payload.

use alloy::primitives::{B256, Bytes, U256};
use eyre::{ensure, eyre};

/// Length of the fixed prefix of an order payload. Anything beyond it is the
/// order's opaque `data`.
pub const ORDER_PAYLOAD_FIXED_LEN: usize = 148;

/// A fast-transfer order as packed into the gateway's `OrderSubmitted` event.
///
/// Layout: sender(32) | recipient(32) | amount_in(32) | amount_out(32) |
/// nonce(4) | source_domain(4) | destination_domain(4) | timeout_timestamp(8)
/// | data(..).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastTransferOrder {
    /// Sender account, left-padded to 32 bytes.
    pub sender: B256,
    /// Recipient account, left-padded to 32 bytes.
    pub recipient: B256,
    /// Amount escrowed on the source chain, in uusdc.
    pub amount_in: U256,
    /// Amount the solver pays the recipient, in uusdc.
    pub amount_out: U256,
    /// Per-sender order nonce.
    pub nonce: u32,
    /// Hyperlane domain of the source chain.
    pub source_domain: u32,
    /// Hyperlane domain of the destination chain.
    pub destination_domain: u32,
    /// Unix seconds after which the order may be refunded.
    pub timeout_timestamp: u64,
    /// Opaque payload forwarded to the recipient.
    pub data: Bytes,
}

impl FastTransferOrder {
    /// Decodes an order from the packed event payload.
    pub fn decode(bytes: &[u8]) -> eyre::Result<Self> {
        ensure!(
            bytes.len() >= ORDER_PAYLOAD_FIXED_LEN,
            "order payload too short: {} bytes, expected at least {ORDER_PAYLOAD_FIXED_LEN}",
            bytes.len()
        );

        Ok(Self {
            sender: B256::from_slice(&bytes[0..32]),
            recipient: B256::from_slice(&bytes[32..64]),
            amount_in: U256::from_be_slice(&bytes[64..96]),
            amount_out: U256::from_be_slice(&bytes[96..128]),
            nonce: u32::from_be_bytes(bytes[128..132].try_into()?),
            source_domain: u32::from_be_bytes(bytes[132..136].try_into()?),
            destination_domain: u32::from_be_bytes(bytes[136..140].try_into()?),
            timeout_timestamp: u64::from_be_bytes(bytes[140..148].try_into()?),
            data: Bytes::copy_from_slice(&bytes[148..]),
        })
    }

    /// Encodes the order back into the packed payload accepted by the
    /// gateway.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(ORDER_PAYLOAD_FIXED_LEN + self.data.len());
        out.extend_from_slice(self.sender.as_slice());
        out.extend_from_slice(self.recipient.as_slice());
        out.extend_from_slice(&self.amount_in.to_be_bytes::<32>());
        out.extend_from_slice(&self.amount_out.to_be_bytes::<32>());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.source_domain.to_be_bytes());
        out.extend_from_slice(&self.destination_domain.to_be_bytes());
        out.extend_from_slice(&self.timeout_timestamp.to_be_bytes());
        out.extend_from_slice(&self.data);
        out.into()
    }

    /// The solver fee implied by the order, in basis points of `amount_in`.
    pub fn fee_bps(&self) -> eyre::Result<u64> {
        fee_bps(self.amount_in, self.amount_out)
    }
}

/// Computes `⌊(amount_in − amount_out) · 10000 / amount_in⌋`.
pub fn fee_bps(amount_in: U256, amount_out: U256) -> eyre::Result<u64> {
    ensure!(!amount_in.is_zero(), "amount in is zero");
    ensure!(amount_out <= amount_in, "amount out {amount_out} exceeds amount in {amount_in}");

    let bps = (amount_in - amount_out) * U256::from(10_000u64) / amount_in;
    bps.try_into().map_err(|_| eyre!("fee bps out of range"))
}
