pub mod accounts;
pub mod backbone;
pub mod bus;
pub mod gatekeeper;
pub mod rooms;

pub use accounts::*;
pub use backbone::*;
pub use bus::*;
pub use gatekeeper::*;
pub use rooms::*;
