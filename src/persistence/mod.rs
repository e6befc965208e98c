//! Account list storage consumed by the daemon.

pub mod account_book;
