//! Agent subprocess layer: line framing, event parsing, binary discovery,
//! process control and send supervision.

mod events;
mod framer;
mod locate;
mod process;
mod supervisor;

pub use events::*;
pub use framer::*;
pub use locate::*;
pub use process::*;
pub use supervisor::*;
