pub mod agent;
mod command;
mod config;
pub mod overview;
mod policy;
mod poll;
mod recorder;
mod resolver;
pub mod submit;
pub mod sweep;

pub use command::*;
pub use config::*;
pub use overview::*;
pub use policy::*;
pub use poll::*;
pub use recorder::*;
pub use submit::*;
pub use sweep::*;
