mod certificate;
mod key_description;

pub use certificate::*;
pub use key_description::*;
