//! # LendingPool Blueprint shared structs
//! Structs used by both the LendingPool component and its callers.

use scrypto::prelude::*;

/// The economic parameters of a lending pool. Pools are never stored under these
/// parameters directly; they are keyed by `pool_id()`, so two calls citing identical
/// parameters always resolve to the same pool.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct PoolParams {
    /// The non-fungible resource accepted as collateral by this pool.
    pub collection: ResourceAddress,
    /// The base interest rate, as a per-second fraction of the principal.
    pub interest_per_second: Decimal,
    /// The maximum variable interest rate component, reached at 100% utilization.
    pub max_variable_interest_per_second: Decimal,
    /// The maximum duration of a loan, in seconds.
    pub max_loan_length: i64,
    /// The maximum loan-to-value ratio against the oracle price (`Decimal::ONE` = 100%).
    pub max_ltv: Decimal,
}

impl PoolParams {
    /// The deterministic pool identifier: a content hash over all parameter fields.
    /// Changing any single field changes the id.
    pub fn pool_id(&self) -> Hash {
        hash(scrypto_encode(self).unwrap())
    }
}

/// Data struct of a loan receipt, gained when borrowing against a pool.
/// Holding this NFT is the claim to repay the loan and redeem the collateral.
#[derive(ScryptoSbor, NonFungibleData, Clone, Debug)]
pub struct Loan {
    /// Image of the NFT
    #[mutable]
    pub key_image_url: Url,
    /// The identifier of the pool this loan was drawn from.
    pub pool_id: Hash,
    /// The collateral collection.
    pub collection: ResourceAddress,
    /// The local id of the NFT held in custody for this loan.
    pub token_id: NonFungibleLocalId,
    /// When the loan was opened.
    pub start: Instant,
    /// The moment after which the loan may be liquidated.
    pub deadline: Instant,
    /// The interest rate fixed at origination, as a per-second fraction of the principal.
    /// Never recalculated during the loan's life.
    pub interest_per_second: Decimal,
    /// The borrowed principal.
    pub principal: Decimal,
    /// The current status of the loan.
    #[mutable]
    pub status: LoanStatus,
}

impl Loan {
    /// The deterministic loan identifier: a content hash over the loan's immutable fields,
    /// used as the receipt's `NonFungibleLocalId`.
    pub fn loan_id(&self) -> NonFungibleLocalId {
        let digest = hash(
            scrypto_encode(&(
                self.pool_id,
                self.collection,
                self.token_id.clone(),
                self.start,
                self.deadline,
                self.interest_per_second,
                self.principal,
            ))
            .unwrap(),
        );
        NonFungibleLocalId::bytes(digest.0.to_vec()).unwrap()
    }
}

/// Represents the possible states of a loan.
#[derive(ScryptoSbor, PartialEq, Eq, Clone, Debug)]
pub enum LoanStatus {
    /// The loan is open; repaying it redeems the collateral.
    Active,
    /// The loan has been fully repaid and the collateral returned.
    Repaid,
    /// The loan passed its deadline and was liquidated by the pool owner.
    Liquidated,
}

/// A single operation for the batched dispatcher. A sequence of these is interpreted in
/// order by `LendingPool::batch`, with the solvency invariant asserted once at the end.
#[derive(ScryptoSbor)]
pub enum PoolAction {
    /// Create or reconfigure a pool (active flag and per-token value cap).
    ConfigurePool {
        params: PoolParams,
        is_active: bool,
        max_value: Decimal,
    },
    /// Add funds to the reserve vault.
    Deposit { funds: FungibleBucket },
    /// Take funds out of the reserve vault. `None` withdraws the entire balance.
    Withdraw { amount: Option<Decimal> },
    /// Sweep the surplus above the recorded reserves.
    PushFree,
    /// Borrow against a batch of collateral NFTs.
    CreateLoan {
        params: PoolParams,
        collateral: NonFungibleBucket,
        value_per_token: Decimal,
        max_price: Decimal,
        price_expiry: i64,
        price_signature: Vec<u8>,
        max_interest: Decimal,
    },
    /// Repay a loan and redeem its collateral.
    RepayLoan {
        receipt: NonFungibleProof,
        payment: FungibleBucket,
    },
    /// Liquidate an expired loan.
    Liquidate { loan_id: NonFungibleLocalId },
}

/// A struct providing a summarized view of a pool's state.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct PoolInfoReturn {
    /// The pool identifier (content hash of the parameters).
    pub pool_id: Hash,
    /// The collateral collection accepted by this pool.
    pub collection: ResourceAddress,
    /// Whether new loans may currently be opened against this pool.
    pub is_active: bool,
    /// The sum of outstanding principal across this pool's open loans.
    pub debt: Decimal,
    /// The cap on per-NFT valuation accepted into this pool.
    pub max_value: Decimal,
}

/// A struct providing a summarized view of the treasury.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct ReserveInfoReturn {
    /// The currency actually held in the reserve vault.
    pub balance: Decimal,
    /// The recorded (promised) reserves.
    pub total_reserves: Decimal,
    /// The sum of outstanding principal across all pools.
    pub total_collateralized_debt: Decimal,
}
