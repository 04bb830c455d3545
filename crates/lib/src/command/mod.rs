//! Command pipeline: parse and validate an untrusted string, then dispatch it.

mod dispatch;
mod parse;

pub use dispatch::{DispatchError, DispatchTable, Dispatcher, Outcome};
pub use parse::{Command, ParseError};
