//! # Price Attestation Verification
//! The wire format and verification of signed collateral price attestations.
//!
//! An off-ledger oracle observes NFT floor prices and signs, per collection, a
//! [`PriceMessage`] binding the price to an expiry and to one specific `LendingPool`
//! deployment. The signed payload is a fixed ASCII prefix followed by the SBOR encoding of
//! the message, hashed with blake2b-256 and signed with a recoverable secp256k1 signature.
//! Reimplementations must match this layout exactly for signature compatibility.

use scrypto::crypto_utils::CryptoUtils;
use scrypto::prelude::*;

/// Version prefix of the signed payload. Bumped if the message layout ever changes.
pub const PRICE_MESSAGE_PREFIX: &[u8] = b"HOARD_PRICE_V1";

/// The content of a price attestation.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct PriceMessage {
    /// The collection this price applies to.
    pub collection: ResourceAddress,
    /// The attested per-NFT price, in the pool's currency.
    pub price: Decimal,
    /// Unix timestamp (seconds) after which the attestation is no longer usable.
    pub expiry: i64,
    /// The component the attestation is addressed to. Prevents replay against other
    /// deployments or networks.
    pub lending_pool: ComponentAddress,
}

/// The hash the oracle signs for a given message. Pure, so off-ledger signers can
/// reproduce it exactly.
pub fn price_message_hash(message: &PriceMessage) -> Hash {
    let mut payload = PRICE_MESSAGE_PREFIX.to_vec();
    payload.extend(scrypto_encode(message).unwrap());
    hash(payload)
}

/// Validates a price attestation against the configured oracle key.
///
/// # Panics
/// * "Price attestation has expired." if the current time is past `expiry`.
/// * "Malformed price signature." if the signature is not 65 bytes.
/// * "Price attestation not signed by the oracle." if the recovered signer differs from
///   `oracle_key`.
pub fn validate_price(
    message: &PriceMessage,
    signature: Vec<u8>,
    oracle_key: &Secp256k1PublicKey,
) {
    assert!(
        Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch <= message.expiry,
        "Price attestation has expired."
    );

    let signature = Secp256k1Signature::try_from(signature.as_slice())
        .expect("Malformed price signature.");
    let signer =
        CryptoUtils::secp256k1_ecdsa_verify_and_key_recover(price_message_hash(message), signature);

    assert!(
        signer == *oracle_key,
        "Price attestation not signed by the oracle."
    );
}
