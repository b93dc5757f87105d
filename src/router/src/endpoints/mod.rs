pub mod deletion;
pub mod migration;
