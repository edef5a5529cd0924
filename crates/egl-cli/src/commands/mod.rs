pub mod hash;
pub mod ledger;
pub mod run_pack;
pub mod seal;
