//! CLI command implementations.
//!
//! | Module     | Commands handled                  |
//! |------------|-----------------------------------|
//! | `project`  | `Init`                            |
//! | `serve`    | `Serve`                           |
//! | `stream`   | `Stream` (add, edit, rm, list)    |
//! | `release`  | `Status`, `Releases`              |

pub mod project;
pub mod release;
pub mod serve;
pub mod stream;

pub use project::cmd_init;
pub use release::{cmd_releases, cmd_status};
pub use serve::cmd_serve;
pub use stream::cmd_stream;

use anyhow::{Context, Result};
use sideloader::config::Config;
use sideloader::db::SideloaderDb;

/// Load configuration and open the database for a one-shot command.
pub(crate) fn open_db(project_dir: &std::path::Path) -> Result<(Config, SideloaderDb)> {
    let config = Config::load(project_dir)?;
    let db_path = config.db_path();
    if !db_path.exists() {
        anyhow::bail!(
            "No release database at {}. Run `sideloader init` first.",
            db_path.display()
        );
    }
    let db = SideloaderDb::new(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    Ok((config, db))
}
