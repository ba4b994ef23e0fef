//! Wallet accuracy profiling: retroactive scoring of trades against later
//! price observations. Feeds the smart-wallet detector.

pub mod accuracy;
pub mod worker;

pub use accuracy::{is_favorable_move, signed_delta, AccuracyConfig, WalletAccuracyScorer};
