//! Project initialization: `sideloader init`.

use anyhow::Result;
use sideloader::config::Config;
use sideloader::db::SideloaderDb;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    let config = Config::load(project_dir)?;
    config.ensure_directories()?;

    let config_path = config.config_path();
    if config_path.exists() {
        println!("Config already present at {}", config_path.display());
    } else {
        config.toml.save(&config_path)?;
        println!("Wrote {}", config_path.display());
    }

    let db_path = config.db_path();
    SideloaderDb::new(&db_path)?;
    println!("Release database ready at {}", db_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Create a stream with `sideloader stream add --name <name>`");
    println!("  2. Run `sideloader serve` to accept pushes and sign-offs");
    Ok(())
}
