//! CLI command implementations.
//!
//! | Module     | Commands handled                       |
//! |------------|----------------------------------------|
//! | `serve`    | `Serve`                                |
//! | `migrate`  | `Migrate`                              |
//! | `query`    | `Stats`, `Next`, `List`, `Mark`        |
//! | `progress` | `Progress`                             |
//! | `config`   | `Config`                               |

pub mod config;
pub mod migrate;
pub mod progress;
pub mod query;
pub mod serve;

pub use config::cmd_config;
pub use migrate::cmd_migrate;
pub use progress::cmd_progress;
pub use query::{cmd_list, cmd_mark, cmd_next, cmd_stats};
pub use serve::cmd_serve;
