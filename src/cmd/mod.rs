//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `track`  | `Track`          |
//! | `serve`  | `Serve`          |
//! | `config` | `Config`         |

pub mod config;
pub mod serve;
pub mod track;

pub use config::cmd_config;
pub use serve::cmd_serve;
pub use track::cmd_track;
