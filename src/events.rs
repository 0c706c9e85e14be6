//! Defines events emitted by the Hoard protocol component.

use crate::shared_structs::*;
use scrypto::prelude::*;

/// Event emitted when a pool is created or reconfigured.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventConfigurePool {
    /// The pool identifier (content hash of the parameters).
    pub pool_id: Hash,
    /// The full parameter set the pool id was derived from.
    pub params: PoolParams,
    /// Whether new loans may be opened against this pool.
    pub is_active: bool,
    /// The cap on per-NFT valuation accepted into this pool.
    pub max_value: Decimal,
}

/// Event emitted when the oracle signer key is replaced.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventSetOracle {
    /// The new oracle public key.
    pub oracle_key: Secp256k1PublicKey,
}

/// Event emitted for every loan opened in a `create_loan` batch.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventNewLoan {
    /// The deterministic id of the loan receipt NFT.
    pub loan_id: NonFungibleLocalId,
    /// The pool the loan was drawn from.
    pub pool_id: Hash,
    /// The collateral collection.
    pub collection: ResourceAddress,
    /// The collateral NFT taken into custody.
    pub token_id: NonFungibleLocalId,
    /// The borrowed principal.
    pub principal: Decimal,
    /// The moment after which the loan may be liquidated.
    pub deadline: Instant,
    /// The fixed per-second interest rate.
    pub interest_per_second: Decimal,
}

/// Event emitted when a loan is repaid and its collateral released.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventRepayLoan {
    /// The id of the repaid loan.
    pub loan_id: NonFungibleLocalId,
    /// The repaid principal.
    pub principal: Decimal,
    /// The interest collected on top of the principal, credited to reserves.
    pub interest_paid: Decimal,
}

/// Event emitted when an expired loan is liquidated by the pool owner.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventLiquidateLoan {
    /// The id of the liquidated loan.
    pub loan_id: NonFungibleLocalId,
    /// The principal written off from the recorded reserves.
    pub principal: Decimal,
}

/// Event emitted when the owner deposits currency into the reserve vault.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventDeposit {
    /// The amount deposited.
    pub amount: Decimal,
    /// The recorded reserves after the deposit.
    pub total_reserves: Decimal,
}

/// Event emitted when the owner withdraws currency from the reserve vault.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventWithdraw {
    /// The amount withdrawn.
    pub amount: Decimal,
    /// The recorded reserves after the withdrawal.
    pub total_reserves: Decimal,
}

/// Event emitted when the surplus above the recorded reserves is swept.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventPushFree {
    /// The surplus amount swept out.
    pub amount: Decimal,
}
