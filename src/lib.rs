pub mod cli;
pub mod config;
pub mod error;
pub mod readings;
pub mod replay;
pub mod signer;
pub mod transport;
