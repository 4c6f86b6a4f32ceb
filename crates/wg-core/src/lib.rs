pub mod defs;
pub mod error;
pub mod host;
pub mod value;

pub use defs::*;
pub use error::ExecError;
pub use host::*;
pub use value::*;
