pub mod attributes;
pub mod equipment;
pub mod family;
pub mod variant;

pub use attributes::*;
pub use equipment::*;
pub use family::*;
pub use variant::*;
