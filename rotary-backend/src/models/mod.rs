//! Domain models shared by the database layer, controllers and extensions

mod extension;
mod mfa;
mod provider;
mod rotation;
mod session;
mod user;

pub use extension::*;
pub use mfa::*;
pub use provider::*;
pub use rotation::*;
pub use session::*;
pub use user::*;
