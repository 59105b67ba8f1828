pub mod choice;
pub mod entity;
pub mod flash;
pub mod model_state;
pub mod view_model;

pub use choice::*;
pub use entity::*;
pub use flash::*;
pub use model_state::*;
pub use view_model::*;
