pub mod coord;
pub mod error;
pub mod reference;
pub mod value;

pub use coord::{A1ParseError, A1Parts, column_to_letters, letters_to_column, parse_a1};
pub use error::*;
pub use reference::*;
pub use value::*;
