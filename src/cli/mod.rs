//! CLI command handling

pub mod app;
pub mod inspect;
pub mod output;
pub mod run;

pub use app::*;
pub use inspect::*;
pub use output::*;
pub use run::*;
