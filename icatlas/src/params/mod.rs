pub mod enums;
mod file;
mod records;
pub mod value;

pub use enums::*;
pub use file::RegistrationParameters;
pub use records::{DenseParameters, RigidParameters};
