pub mod config;
pub mod delta;
pub mod diagnostics;
pub mod differ;
pub mod error;
pub mod export;
pub mod matrix;
pub mod pipeline;
pub mod ranking;
pub mod stats;
pub mod traits;
pub mod types;

pub use config::*;
pub use delta::*;
pub use diagnostics::*;
pub use differ::*;
pub use error::*;
pub use matrix::*;
pub use pipeline::*;
pub use ranking::*;
pub use stats::*;
pub use traits::*;
pub use types::*;
