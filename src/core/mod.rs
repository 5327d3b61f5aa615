pub mod error;
pub mod handle;

pub use error::{PmemError, Result};
pub use handle::Handle;
