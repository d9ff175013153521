mod audit;
mod condition;
mod intent;
mod policy;
mod signal;

pub use audit::*;
pub use condition::*;
pub use intent::*;
pub use policy::*;
pub use signal::*;
