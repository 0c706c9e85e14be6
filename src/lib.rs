//! # Hoard Protocol Crate
//!
//! This crate contains the core Scrypto blueprint for Hoard, a lending protocol that lets
//! users borrow a fungible currency (XRD in production) against NFT collateral.
//!
//! Pools of lending terms are identified by a content hash of their parameters; borrowers
//! post NFTs from a pool's collection and receive currency from a shared reserve, priced by
//! a signed oracle attestation. Each open position is represented by a transferable loan
//! receipt NFT. Interest is fixed per loan at origination as a function of pool utilization.
//!
//! ## Modules
//!
//! The crate is organized into the following modules:
//!
//! - `lending_pool`: Defines the main `LendingPool` component: the pool registry, the loan
//!   ledger (creation, repayment, liquidation), the interest model, reserve/treasury
//!   accounting, the solvency invariant check, and the batched action dispatcher.
//! - `price_oracle`: The price attestation wire format and its secp256k1 verification.
//! - `events`: Events emitted by the protocol, allowing off-ledger services to track state
//!   changes.
//! - `shared_structs`: Data structures shared between the component and its callers, such
//!   as `PoolParams`, `Loan`, and `PoolAction`.

pub mod events;
pub mod lending_pool;
pub mod price_oracle;
pub mod shared_structs;
