#![allow(deprecated)]

//! # The Hoard Core Logic Blueprint
//!
//! This blueprint defines the core component of the Hoard protocol, responsible for managing
//! lending pools, issuing loans against NFT collateral, repayments, liquidations, and the
//! reserve accounting that backs it all.
//!
//! ## Overview
//! The pool owner configures one or more lending pools, each keyed by a content hash of its
//! economic parameters (collection, base rate, maximum variable rate, maximum duration,
//! maximum LTV). Borrowers interact with the component directly:
//! - **Open a loan:** Deposit NFTs from a pool's collection together with a signed oracle
//!   price attestation, and receive the claimed value per NFT from the shared reserve. A
//!   transferable loan receipt NFT represents each position.
//! - **Repay:** Present the receipt and pay principal plus simple interest to redeem the
//!   collateral. The interest is credited to the recorded reserves.
//! - **Liquidation:** Once a loan passes its deadline the owner may liquidate it, writing
//!   the principal off from the recorded reserves and taking the collateral for disposal.
//!
//! ## Key Concepts
//! - **Pool:** A named configuration of lending terms, identified by `PoolParams::pool_id()`.
//!   Only the active flag and the per-NFT value cap are mutable; everything else is part of
//!   the identity.
//! - **Loan receipt:** An NFT whose id is a content hash of the loan's immutable terms.
//!   Holding it is the claim to repay. Closure flips its status rather than deleting it, so
//!   operations on a closed loan fail with a clear message.
//! - **Reserves vs. balance:** `total_reserves` is what the pool has promised to honor;
//!   the vault balance is what it actually holds. Balance plus outstanding collateralized
//!   debt must never fall below the recorded reserves (the solvency invariant). Any excess
//!   of balance plus debt over reserves is "free" and can be swept by the owner.
//! - **Fixed interest:** A loan's rate is computed once at origination from pool
//!   utilization (`base + (debt + principal/2) * max_variable / reserves`) and never
//!   recalculated.
//!
//! ## Batched dispatch
//! `batch` interprets a sequence of typed `PoolAction`s against component state and asserts
//! the solvency invariant exactly once, after the last action. This permits multi-step
//! sequences (e.g. withdraw, then redeposit an offsetting amount) whose intermediate states
//! would not individually satisfy a per-call check.

use crate::events::*;
use crate::price_oracle::{validate_price, PriceMessage};
use crate::shared_structs::*;
use scrypto::prelude::*;
use scrypto_avltree::AvlTree;

/// The mutable state of one lending pool, keyed by the pool id in the component's
/// `pools` store. Created on first configuration; the economic parameters themselves are
/// never stored, only their hash.
#[derive(ScryptoSbor)]
pub struct PoolState {
    /// Gates new borrowing. Closing existing loans is always permitted.
    pub is_active: bool,
    /// The sum of outstanding principal across this pool's open loans.
    pub debt: Decimal,
    /// The cap on per-NFT valuation accepted into this pool.
    pub max_value: Decimal,
    /// Open loan ids indexed by deadline (seconds since epoch), for liquidation queries.
    pub loans_by_deadline: AvlTree<i64, Vec<NonFungibleLocalId>>,
}

#[blueprint]
#[types(
    Hash,
    PoolState,
    ResourceAddress,
    NonFungibleVault,
    AvlTree<i64, Vec<NonFungibleLocalId>>,
    Vec<NonFungibleLocalId>,
    NonFungibleLocalId,
    i64,
    Instant,
    Decimal,
    Loan
)]
#[events(
    EventConfigurePool,
    EventSetOracle,
    EventNewLoan,
    EventRepayLoan,
    EventLiquidateLoan,
    EventDeposit,
    EventWithdraw,
    EventPushFree
)]
mod lending_pool {
    enable_method_auth! {
        methods {
            configure_pool => restrict_to: [OWNER];
            set_oracle_key => restrict_to: [OWNER];
            deposit => restrict_to: [OWNER];
            withdraw => restrict_to: [OWNER];
            push_free => restrict_to: [OWNER];
            liquidate => restrict_to: [OWNER];
            batch => restrict_to: [OWNER];
            create_loan => PUBLIC;
            repay_loan => PUBLIC;
            burn_loan_receipt => PUBLIC;
            quote_interest_rate => PUBLIC;
            get_pool_info => PUBLIC;
            get_loans_info => PUBLIC;
            get_expired_loans => PUBLIC;
            get_reserve_info => PUBLIC;
            get_loan_receipt_address => PUBLIC;
        }
    }

    /// Contains the state and logic of the Hoard lending component.
    struct LendingPool {
        /// Pool state keyed by the content hash of the pool's parameters.
        pools: KeyValueStore<Hash, PoolState>,
        /// Custody vaults for collateral NFTs, one per collection, created lazily.
        collateral_vaults: KeyValueStore<ResourceAddress, NonFungibleVault>,
        /// The shared reserve all pools lend from.
        reserve_vault: FungibleVault,
        /// The fungible resource being lent out.
        currency: ResourceAddress,
        /// The currency amount the pool has promised to honor. Distinct from the vault
        /// balance; the excess of balance + debt over this is sweepable surplus.
        total_reserves: Decimal,
        /// The sum of outstanding loan principal across all pools.
        total_collateralized_debt: Decimal,
        /// The key price attestations must be signed with.
        oracle_key: Secp256k1PublicKey,
        /// Manages the loan receipt NFTs.
        loan_manager: ResourceManager,
    }

    impl LendingPool {
        /// Instantiates the `LendingPool` component.
        ///
        /// # Arguments
        /// * `currency`: The fungible resource to lend out (XRD in production).
        /// * `oracle_key`: The secp256k1 public key price attestations must be signed with.
        /// * `dapp_def_address`: The `GlobalAddress` of the DApp Definition account for
        ///   metadata linkage.
        ///
        /// # Returns
        /// * `(Global<LendingPool>, Bucket)`: The globalized component and the owner badge.
        ///   The badge gates pool configuration, treasury management, liquidations, and
        ///   batched dispatch.
        pub fn instantiate(
            currency: ResourceAddress,
            oracle_key: Secp256k1PublicKey,
            dapp_def_address: GlobalAddress,
        ) -> (Global<LendingPool>, Bucket) {
            assert!(
                currency.is_fungible(),
                "The lending currency must be a fungible resource."
            );

            let (address_reservation, component_address) =
                Runtime::allocate_component_address(LendingPool::blueprint_id());

            let owner_badge: Bucket = ResourceBuilder::new_fungible(OwnerRole::None)
                .divisibility(DIVISIBILITY_NONE)
                .metadata(metadata! (
                    init {
                        "name" => "Hoard Owner Badge", locked;
                        "symbol" => "HOARDOWN", locked;
                    }
                ))
                .mint_initial_supply(1)
                .into();

            let loan_manager: ResourceManager =
                ResourceBuilder::new_bytes_non_fungible_with_registered_type::<Loan>(
                    OwnerRole::Fixed(rule!(require(owner_badge.resource_address()))),
                )
                .metadata(metadata!(
                    init {
                        "name" => "Hoard Loan Receipt", locked;
                        "symbol" => "HOARDLOAN", locked;
                        "description" => "A receipt for your Hoard loan. Holding it is the claim to repay and redeem the collateral.", locked;
                        "info_url" => "https://hoardlend.xyz", updatable;
                        "icon_url" => Url::of("https://hoardlend.xyz/hoard-logo.png"), updatable;
                        "dapp_definitions" => vec![dapp_def_address], updatable;
                    }
                ))
                .non_fungible_data_update_roles(non_fungible_data_update_roles!(
                    non_fungible_data_updater => rule!(require(global_caller(component_address)));
                    non_fungible_data_updater_updater => rule!(deny_all);
                ))
                .mint_roles(mint_roles!(
                    minter => rule!(require(global_caller(component_address)));
                    minter_updater => rule!(deny_all);
                ))
                .burn_roles(burn_roles!(
                    burner => rule!(require(global_caller(component_address)));
                    burner_updater => rule!(deny_all);
                ))
                .create_with_no_initial_supply()
                .into();

            let lending_pool = Self {
                pools: KeyValueStore::new_with_registered_type(),
                collateral_vaults: KeyValueStore::new_with_registered_type(),
                reserve_vault: FungibleVault::new(currency),
                currency,
                total_reserves: Decimal::ZERO,
                total_collateralized_debt: Decimal::ZERO,
                oracle_key,
                loan_manager,
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::Fixed(rule!(require(
                owner_badge.resource_address()
            ))))
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Hoard Lending Pool".to_string(), updatable;
                    "description" => "The core logic component for the Hoard protocol".to_string(), updatable;
                    "info_url" => Url::of("https://hoardlend.xyz"), updatable;
                    "dapp_definition" => dapp_def_address, updatable;
                }
            })
            .globalize();

            (lending_pool, owner_badge)
        }

        //////////////////////////////////////////////////////////////////
        ///////////////////////// POOL REGISTRY //////////////////////////
        //////////////////////////////////////////////////////////////////

        /// Creates or reconfigures a pool.
        ///
        /// Only the active flag and the per-NFT value cap are mutable pool state; the
        /// economic parameters are part of the pool's identity. Reconfiguring an existing
        /// pool preserves its outstanding debt and deadline index, so configuring the same
        /// pool twice with the same inputs yields the same stored state as once.
        pub fn configure_pool(
            &mut self,
            params: PoolParams,
            is_active: bool,
            max_value: Decimal,
        ) {
            assert!(
                !params.collection.is_fungible(),
                "The pool collection must be a non-fungible resource."
            );
            assert!(
                params.max_loan_length > 0,
                "The maximum loan length must be positive."
            );

            let pool_id = params.pool_id();

            if self.pools.get(&pool_id).is_some() {
                let mut pool = self.pools.get_mut(&pool_id).unwrap();
                pool.is_active = is_active;
                pool.max_value = max_value;
            } else {
                self.pools.insert(
                    pool_id,
                    PoolState {
                        is_active,
                        debt: Decimal::ZERO,
                        max_value,
                        loans_by_deadline: AvlTree::new(),
                    },
                );
            }

            Runtime::emit_event(EventConfigurePool {
                pool_id,
                params,
                is_active,
                max_value,
            });
        }

        /// Replaces the oracle signer key. Attestations signed with the old key are
        /// rejected from this point on.
        pub fn set_oracle_key(&mut self, oracle_key: Secp256k1PublicKey) {
            self.oracle_key = oracle_key;
            Runtime::emit_event(EventSetOracle { oracle_key });
        }

        //////////////////////////////////////////////////////////////////
        ///////////////////////// LOAN LEDGER ////////////////////////////
        //////////////////////////////////////////////////////////////////

        /// Opens loans against a batch of collateral NFTs from one pool.
        ///
        /// # Arguments
        /// * `params`: The pool's full parameter set (resolved to the pool by content hash).
        /// * `collateral`: The NFTs to post, all from the pool's collection. One loan is
        ///   opened per NFT; the whole batch shares one interest rate.
        /// * `value_per_token`: The claimed per-NFT value, borrowed as principal per NFT.
        /// * `max_price`: The oracle-attested per-NFT price.
        /// * `price_expiry`: Unix timestamp the attestation expires at.
        /// * `price_signature`: The oracle's recoverable secp256k1 signature (65 bytes).
        /// * `max_interest`: Slippage bound on the computed per-second interest rate.
        ///
        /// # Returns
        /// * `(FungibleBucket, NonFungibleBucket)`: The borrowed currency
        ///   (`value_per_token` per NFT) and the loan receipt NFTs.
        ///
        /// # Panics
        /// * If the pool is unconfigured or inactive.
        /// * If the collateral is empty or not from the pool's collection.
        /// * If `value_per_token` exceeds the pool's value cap.
        /// * If the attestation is expired or not signed by the configured oracle.
        /// * If `value_per_token` exceeds `max_price * max_ltv`.
        /// * If the computed rate exceeds `max_interest`, or reserves are empty.
        /// * If the reserve vault cannot fund the aggregate principal.
        /// * If the solvency invariant does not hold at the call boundary.
        ///
        /// # Logic
        /// 1. Resolves the pool and validates the claimed value against its cap.
        /// 2. Validates the price attestation and the LTV bound.
        /// 3. Computes the batch's fixed rate from pool utilization; reserves are read
        ///    before any debt mutation of this call.
        /// 4. Mints one receipt per NFT (start = now, deadline = now + max length,
        ///    principal = claimed value), registers the deadline, emits `EventNewLoan`.
        /// 5. Takes the collateral into custody, increases pool and global debt by the
        ///    aggregate principal, and pays that amount out of the reserve vault.
        pub fn create_loan(
            &mut self,
            params: PoolParams,
            collateral: NonFungibleBucket,
            value_per_token: Decimal,
            max_price: Decimal,
            price_expiry: i64,
            price_signature: Vec<u8>,
            max_interest: Decimal,
        ) -> (FungibleBucket, NonFungibleBucket) {
            let result = self.create_loan_internal(
                params,
                collateral,
                value_per_token,
                max_price,
                price_expiry,
                price_signature,
                max_interest,
            );
            self.assert_solvent();
            result
        }

        /// Repays a loan and redeems its collateral.
        ///
        /// # Arguments
        /// * `receipt`: Proof of the loan receipt NFT. Presenting it is the ownership
        ///   check; receipts are freely transferable claim tickets.
        /// * `payment`: Currency covering principal plus accrued interest.
        ///
        /// # Returns
        /// * `(NonFungibleBucket, FungibleBucket)`: The collateral NFT and the change.
        ///
        /// # Panics
        /// * If the proof is not a loan receipt of this component.
        /// * If the loan is not active (already repaid or liquidated).
        /// * If the payment is the wrong resource or does not cover the amount owed.
        ///
        /// # Logic
        /// Interest is simple and linear: `principal * rate * elapsed_seconds`. The owed
        /// amount enters the reserve vault and the interest part is credited to the
        /// recorded reserves; pool and global debt decrease by the principal. The receipt's
        /// status flips to `Repaid` (it can be burned afterwards via `burn_loan_receipt`).
        /// Repayment ignores the pool's active flag.
        pub fn repay_loan(
            &mut self,
            receipt: NonFungibleProof,
            payment: FungibleBucket,
        ) -> (NonFungibleBucket, FungibleBucket) {
            let result = self.repay_loan_internal(receipt, payment);
            self.assert_solvent();
            result
        }

        /// Liquidates a loan whose deadline has passed.
        ///
        /// The loan's principal is written off from the recorded reserves: the pool gives
        /// up on recovering interest and treats the forfeited collateral, to be disposed of
        /// separately, as satisfying the debt. Removing a loan whose expected recovery
        /// equals its principal while writing off exactly that principal never shrinks the
        /// solvency margin, so no invariant check is needed here.
        ///
        /// # Panics
        /// * If the loan is not active, or its deadline has not passed yet.
        pub fn liquidate(&mut self, loan_id: NonFungibleLocalId) -> NonFungibleBucket {
            self.liquidate_internal(loan_id)
        }

        /// Burns a receipt of a closed (repaid or liquidated) loan. Receipts of active
        /// loans cannot be burned; they are the claim to the collateral.
        pub fn burn_loan_receipt(&self, receipt: NonFungibleBucket) {
            assert!(
                receipt.resource_address() == self.loan_manager.address(),
                "Invalid loan receipt."
            );

            for loan_id in receipt.non_fungible_local_ids() {
                let loan: Loan = self.loan_manager.get_non_fungible_data(&loan_id);
                assert!(
                    loan.status != LoanStatus::Active,
                    "Cannot burn the receipt of an active loan."
                );
            }

            receipt.burn();
        }

        //////////////////////////////////////////////////////////////////
        //////////////////////////// TREASURY ////////////////////////////
        //////////////////////////////////////////////////////////////////

        /// Adds funds to the reserve vault and re-records the reserves as
        /// `balance + total_collateralized_debt`.
        ///
        /// # Panics
        /// * If the funds are the wrong resource.
        /// * "Insolvent: deposit may not lower recorded reserves." if the recomputed
        ///   reserves would be lower than before. Deposits are monotonically
        ///   reserve-increasing; this entry point can never mark reserves down.
        pub fn deposit(&mut self, funds: FungibleBucket) {
            self.deposit_internal(funds);
        }

        /// Takes funds out of the reserve vault, decrementing the recorded reserves.
        /// `None` withdraws the entire vault balance.
        ///
        /// Deliberately not guarded by the solvency check at its own boundary: the owner is
        /// trusted, and the next guarded call surfaces any shortfall. The decrement itself
        /// still fails on accounting underflow.
        pub fn withdraw(&mut self, amount: Option<Decimal>) -> FungibleBucket {
            self.withdraw_internal(amount)
        }

        /// Sweeps the surplus above the recorded reserves: exactly
        /// `balance + total_collateralized_debt - total_reserves`. Returns an empty bucket
        /// when there is nothing free.
        pub fn push_free(&mut self) -> FungibleBucket {
            self.push_free_internal()
        }

        //////////////////////////////////////////////////////////////////
        ///////////////////////// BATCHED DISPATCH ///////////////////////
        //////////////////////////////////////////////////////////////////

        /// Interprets a sequence of `PoolAction`s in order against the component state,
        /// asserting the solvency invariant exactly once, after the last action.
        ///
        /// Intermediate states need not satisfy the invariant, which permits sequences like
        /// "withdraw, then redeposit an offsetting amount" that a per-action check would
        /// reject. Any failing action aborts the entire transaction.
        ///
        /// # Returns
        /// * `Vec<Bucket>`: Every bucket produced by the actions, appended in action order
        ///   (`CreateLoan` appends funds then receipts; `RepayLoan` appends collateral then
        ///   change).
        pub fn batch(&mut self, actions: Vec<PoolAction>) -> Vec<Bucket> {
            let mut outputs: Vec<Bucket> = vec![];

            for action in actions {
                match action {
                    PoolAction::ConfigurePool {
                        params,
                        is_active,
                        max_value,
                    } => self.configure_pool(params, is_active, max_value),
                    PoolAction::Deposit { funds } => self.deposit_internal(funds),
                    PoolAction::Withdraw { amount } => {
                        outputs.push(self.withdraw_internal(amount).into())
                    }
                    PoolAction::PushFree => outputs.push(self.push_free_internal().into()),
                    PoolAction::CreateLoan {
                        params,
                        collateral,
                        value_per_token,
                        max_price,
                        price_expiry,
                        price_signature,
                        max_interest,
                    } => {
                        let (funds, receipts) = self.create_loan_internal(
                            params,
                            collateral,
                            value_per_token,
                            max_price,
                            price_expiry,
                            price_signature,
                            max_interest,
                        );
                        outputs.push(funds.into());
                        outputs.push(receipts.into());
                    }
                    PoolAction::RepayLoan { receipt, payment } => {
                        let (collateral, change) = self.repay_loan_internal(receipt, payment);
                        outputs.push(collateral.into());
                        outputs.push(change.into());
                    }
                    PoolAction::Liquidate { loan_id } => {
                        outputs.push(self.liquidate_internal(loan_id).into())
                    }
                }
            }

            self.assert_solvent();

            outputs
        }

        //////////////////////////////////////////////////////////////////
        //////////////////////////// GETTERS /////////////////////////////
        //////////////////////////////////////////////////////////////////

        /// The rate a loan of `aggregate_principal` would be originated at right now.
        /// Identical to the rate `create_loan` fixes into the receipts.
        pub fn quote_interest_rate(
            &self,
            params: PoolParams,
            aggregate_principal: Decimal,
        ) -> Decimal {
            let pool_debt = self
                .pools
                .get(&params.pool_id())
                .expect("Pool does not exist.")
                .debt;
            self.loan_rate(&params, pool_debt, aggregate_principal)
        }

        /// A pool's current state. Unconfigured pools report the default inactive, zero
        /// debt, zero cap state.
        pub fn get_pool_info(&self, params: PoolParams) -> PoolInfoReturn {
            let pool_id = params.pool_id();
            match self.pools.get(&pool_id) {
                Some(pool) => PoolInfoReturn {
                    pool_id,
                    collection: params.collection,
                    is_active: pool.is_active,
                    debt: pool.debt,
                    max_value: pool.max_value,
                },
                None => PoolInfoReturn {
                    pool_id,
                    collection: params.collection,
                    is_active: false,
                    debt: Decimal::ZERO,
                    max_value: Decimal::ZERO,
                },
            }
        }

        /// Retrieves the `Loan` data for a list of loan ids.
        ///
        /// # Panics
        /// * If any loan id was never minted.
        pub fn get_loans_info(
            &self,
            loan_ids: Vec<NonFungibleLocalId>,
        ) -> Vec<(NonFungibleLocalId, Loan)> {
            loan_ids
                .into_iter()
                .map(|loan_id| {
                    let loan: Loan = self.loan_manager.get_non_fungible_data(&loan_id);
                    (loan_id, loan)
                })
                .collect()
        }

        /// Walks a pool's deadline index and returns up to `amount` open loans whose
        /// deadline has passed, oldest deadline first.
        pub fn get_expired_loans(
            &self,
            params: PoolParams,
            amount: u64,
        ) -> Vec<NonFungibleLocalId> {
            let mut expired: Vec<NonFungibleLocalId> = vec![];

            let pool = self
                .pools
                .get(&params.pool_id())
                .expect("Pool does not exist.");
            let now = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;

            for (_deadline, loan_ids, next_deadline) in
                pool.loans_by_deadline.range(i64::MIN..now)
            {
                for loan_id in loan_ids {
                    expired.push(loan_id.clone());
                    if expired.len() as u64 >= amount {
                        return expired;
                    }
                }
                if next_deadline.is_none() {
                    break;
                }
            }

            expired
        }

        /// The treasury's balance, recorded reserves, and outstanding collateralized debt.
        pub fn get_reserve_info(&self) -> ReserveInfoReturn {
            ReserveInfoReturn {
                balance: self.reserve_vault.amount(),
                total_reserves: self.total_reserves,
                total_collateralized_debt: self.total_collateralized_debt,
            }
        }

        pub fn get_loan_receipt_address(&self) -> ResourceAddress {
            self.loan_manager.address()
        }

        //////////////////////////////////////////////////////////////////
        //////////////////////////// HELPERS /////////////////////////////
        //////////////////////////////////////////////////////////////////

        fn create_loan_internal(
            &mut self,
            params: PoolParams,
            collateral: NonFungibleBucket,
            value_per_token: Decimal,
            max_price: Decimal,
            price_expiry: i64,
            price_signature: Vec<u8>,
            max_interest: Decimal,
        ) -> (FungibleBucket, NonFungibleBucket) {
            let pool_id = params.pool_id();

            let pool_debt = {
                let pool = self.pools.get(&pool_id);
                assert!(
                    pool.as_ref().map(|pool| pool.is_active).unwrap_or(false),
                    "Pool does not exist or is not active."
                );
                let pool = pool.unwrap();
                assert!(
                    value_per_token <= pool.max_value,
                    "Token value exceeds the pool maximum."
                );
                pool.debt
            };

            assert!(
                collateral.resource_address() == params.collection,
                "Collateral does not match the pool's collection."
            );
            assert!(!collateral.is_empty(), "No collateral provided.");

            validate_price(
                &PriceMessage {
                    collection: params.collection,
                    price: max_price,
                    expiry: price_expiry,
                    lending_pool: Runtime::global_address(),
                },
                price_signature,
                &self.oracle_key,
            );

            assert!(
                value_per_token <= max_price * params.max_ltv,
                "Collateral value too high for the oracle valuation."
            );

            // Reserves are read here, before any debt mutation of this call.
            let aggregate_principal = value_per_token * collateral.amount();
            let interest_per_second = self.loan_rate(&params, pool_debt, aggregate_principal);
            assert!(
                interest_per_second <= max_interest,
                "Computed interest exceeds the accepted maximum."
            );

            let start = Clock::current_time_rounded_to_seconds();
            let deadline = Instant::new(
                start
                    .seconds_since_unix_epoch
                    .checked_add(params.max_loan_length)
                    .expect("Loan deadline overflows."),
            );

            let mut receipts = NonFungibleBucket::new(self.loan_manager.address());
            let mut loan_ids: Vec<NonFungibleLocalId> = vec![];

            for token_id in collateral.non_fungible_local_ids() {
                let loan = Loan {
                    key_image_url: Url::of("https://hoardlend.xyz/hoard-loan.png"),
                    pool_id,
                    collection: params.collection,
                    token_id: token_id.clone(),
                    start,
                    deadline,
                    interest_per_second,
                    principal: value_per_token,
                    status: LoanStatus::Active,
                };
                let loan_id = loan.loan_id();

                receipts.put(
                    self.loan_manager
                        .mint_non_fungible(&loan_id, loan.clone())
                        .as_non_fungible(),
                );
                loan_ids.push(loan_id.clone());

                Runtime::emit_event(EventNewLoan {
                    loan_id,
                    pool_id,
                    collection: params.collection,
                    token_id,
                    principal: value_per_token,
                    deadline,
                    interest_per_second,
                });
            }

            self.put_collateral(params.collection, collateral);
            self.register_deadlines(pool_id, deadline.seconds_since_unix_epoch, loan_ids);

            self.pools.get_mut(&pool_id).unwrap().debt += aggregate_principal;
            self.total_collateralized_debt += aggregate_principal;

            assert!(
                self.reserve_vault.amount() >= aggregate_principal,
                "Not enough reserves to fund the loan."
            );

            (self.reserve_vault.take(aggregate_principal), receipts)
        }

        fn repay_loan_internal(
            &mut self,
            receipt: NonFungibleProof,
            mut payment: FungibleBucket,
        ) -> (NonFungibleBucket, FungibleBucket) {
            let receipt = receipt.check_with_message(
                self.loan_manager.address(),
                "Incorrect proof! Are you sure this loan is yours?",
            );
            assert!(
                payment.resource_address() == self.currency,
                "Invalid payment resource."
            );

            let loan_nft = receipt.non_fungible::<Loan>();
            let loan_id = loan_nft.local_id().clone();
            let loan: Loan = loan_nft.data();

            assert!(loan.status == LoanStatus::Active, "Loan is not active.");

            let elapsed = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch
                - loan.start.seconds_since_unix_epoch;
            let interest_paid = loan.principal * loan.interest_per_second * Decimal::from(elapsed);
            let owed = loan.principal + interest_paid;

            assert!(
                payment.amount() >= owed,
                "Not enough payment to repay the loan."
            );

            self.reserve_vault.put(payment.take(owed));
            self.total_reserves += interest_paid;

            let collateral = self.close_loan(&loan_id, &loan, LoanStatus::Repaid);

            Runtime::emit_event(EventRepayLoan {
                loan_id,
                principal: loan.principal,
                interest_paid,
            });

            (collateral, payment)
        }

        fn liquidate_internal(&mut self, loan_id: NonFungibleLocalId) -> NonFungibleBucket {
            let loan: Loan = self.loan_manager.get_non_fungible_data(&loan_id);

            assert!(loan.status == LoanStatus::Active, "Loan is not active.");
            assert!(
                Clock::current_time_is_strictly_after(loan.deadline, TimePrecision::Second),
                "Loan deadline has not passed yet."
            );

            // Write the principal off: the forfeited collateral settles the debt.
            assert!(
                self.total_reserves >= loan.principal,
                "Reserve accounting underflow."
            );
            self.total_reserves -= loan.principal;

            let collateral = self.close_loan(&loan_id, &loan, LoanStatus::Liquidated);

            Runtime::emit_event(EventLiquidateLoan {
                loan_id,
                principal: loan.principal,
            });

            collateral
        }

        fn deposit_internal(&mut self, funds: FungibleBucket) {
            assert!(
                funds.resource_address() == self.currency,
                "Invalid deposit resource."
            );

            let amount = funds.amount();
            self.reserve_vault.put(funds);

            let new_reserves = self.reserve_vault.amount() + self.total_collateralized_debt;
            assert!(
                new_reserves >= self.total_reserves,
                "Insolvent: deposit may not lower recorded reserves."
            );
            self.total_reserves = new_reserves;

            Runtime::emit_event(EventDeposit {
                amount,
                total_reserves: new_reserves,
            });
        }

        fn withdraw_internal(&mut self, amount: Option<Decimal>) -> FungibleBucket {
            let amount = match amount {
                Some(amount) => amount,
                None => self.reserve_vault.amount(),
            };

            assert!(
                self.total_reserves >= amount,
                "Reserve accounting underflow."
            );
            self.total_reserves -= amount;

            Runtime::emit_event(EventWithdraw {
                amount,
                total_reserves: self.total_reserves,
            });

            self.reserve_vault.take(amount)
        }

        fn push_free_internal(&mut self) -> FungibleBucket {
            let free = self.reserve_vault.amount() + self.total_collateralized_debt
                - self.total_reserves;
            assert!(
                free >= Decimal::ZERO,
                "Insolvent: reserves exceed cash and outstanding debt."
            );

            Runtime::emit_event(EventPushFree { amount: free });

            self.reserve_vault.take(free)
        }

        /// The per-second rate for a new loan: the base rate plus the variable component
        /// scaled by pool utilization. Half the new principal counts towards utilization,
        /// pricing the batch at its average marginal impact rather than at the post-borrow
        /// level.
        fn loan_rate(
            &self,
            params: &PoolParams,
            pool_debt: Decimal,
            aggregate_principal: Decimal,
        ) -> Decimal {
            assert!(
                self.total_reserves > Decimal::ZERO,
                "No reserves to borrow against."
            );
            params.interest_per_second
                + (pool_debt + aggregate_principal / dec!(2))
                    * params.max_variable_interest_per_second
                    / self.total_reserves
        }

        /// Shared closure path of repayment and liquidation: decrements pool and global
        /// debt, removes the deadline index entry, flips the receipt's status, and releases
        /// the collateral NFT from custody.
        fn close_loan(
            &mut self,
            loan_id: &NonFungibleLocalId,
            loan: &Loan,
            status: LoanStatus,
        ) -> NonFungibleBucket {
            self.total_collateralized_debt -= loan.principal;

            {
                let mut pool = self.pools.get_mut(&loan.pool_id).unwrap();
                pool.debt -= loan.principal;

                let deadline_key = loan.deadline.seconds_since_unix_epoch;
                let mut loan_ids: Vec<NonFungibleLocalId> = pool
                    .loans_by_deadline
                    .get(&deadline_key)
                    .unwrap()
                    .to_vec();
                loan_ids.retain(|id| id != loan_id);

                if loan_ids.is_empty() {
                    pool.loans_by_deadline.remove(&deadline_key);
                } else {
                    pool.loans_by_deadline.insert(deadline_key, loan_ids);
                }
            }

            self.loan_manager
                .update_non_fungible_data(loan_id, "status", status);

            self.collateral_vaults
                .get_mut(&loan.collection)
                .unwrap()
                .take_non_fungible(&loan.token_id)
        }

        fn put_collateral(&mut self, collection: ResourceAddress, collateral: NonFungibleBucket) {
            if self.collateral_vaults.get(&collection).is_none() {
                self.collateral_vaults
                    .insert(collection, NonFungibleVault::new(collection));
            }
            self.collateral_vaults
                .get_mut(&collection)
                .unwrap()
                .put(collateral);
        }

        fn register_deadlines(
            &mut self,
            pool_id: Hash,
            deadline_key: i64,
            mut loan_ids: Vec<NonFungibleLocalId>,
        ) {
            let mut pool = self.pools.get_mut(&pool_id).unwrap();
            let existing = pool
                .loans_by_deadline
                .get(&deadline_key)
                .map(|ids| ids.to_vec());
            if let Some(mut combined) = existing {
                combined.append(&mut loan_ids);
                pool.loans_by_deadline.insert(deadline_key, combined);
            } else {
                pool.loans_by_deadline.insert(deadline_key, loan_ids);
            }
        }

        /// The solvency invariant: everything the pool could ever realize (cash plus
        /// expected recoveries) must cover everything it has promised.
        fn assert_solvent(&self) {
            assert!(
                self.reserve_vault.amount() + self.total_collateralized_debt
                    >= self.total_reserves,
                "Insolvent: reserves exceed cash and outstanding debt."
            );
        }
    }
}
