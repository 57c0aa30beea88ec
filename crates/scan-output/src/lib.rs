mod console;
mod models;
mod write;

pub use console::*;
pub use models::*;
pub use write::*;
