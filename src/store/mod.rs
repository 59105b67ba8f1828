pub mod memory;
pub mod traits;
pub mod unit_of_work;

pub use memory::*;
pub use traits::*;
pub use unit_of_work::*;
