pub mod issue;
pub mod outcome;

pub use issue::*;
pub use outcome::*;
