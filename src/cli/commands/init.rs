//! Init command: create the store schema.

use std::path::Path;

use console::style;

use crate::repository::TrendsRepository;

pub fn cmd_init(db: &Path) -> anyhow::Result<()> {
    TrendsRepository::new(db)?;
    println!(
        "{} Initialized trends store at {}",
        style("✓").green(),
        db.display()
    );
    Ok(())
}
