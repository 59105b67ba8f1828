pub mod form;

pub use form::{FormBinder, FormModel, PostedValues, ID_SUFFIX, VERSION_KEY};
