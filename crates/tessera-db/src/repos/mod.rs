//! Repository implementations

pub mod bundle;
pub mod deposit;
pub mod vault;

pub use bundle::BundleRepo;
pub use deposit::DepositRepo;
pub use vault::VaultRepo;
