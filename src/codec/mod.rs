//! Launcher script encoding and decoding.

mod cp1251;
pub mod script;

pub use script::{client_arguments, decode, encode, LauncherScript};
