pub mod config;
pub mod derivados;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod proof;
pub mod reminder;
pub mod responder;
pub mod store;
pub mod transport;
pub mod users;

#[cfg(test)]
pub(crate) mod testutil;
