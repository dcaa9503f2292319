//! Status command: store counts at a glance.

use std::path::Path;

use console::style;

use crate::repository::TrendsRepository;

pub fn cmd_status(db: &Path) -> anyhow::Result<()> {
    let repo = TrendsRepository::new(db)?;
    let summary = repo.summary()?;

    println!("{}", style("Requests").bold());
    for (name, count) in &summary.statuses {
        println!("  {:<10} {}", name, count);
    }

    println!();
    println!("{}", style("Data").bold());
    println!("  staged     {}", summary.staged);
    println!("  timeframes {}", summary.timeframes);
    println!("  geo values {}", summary.geo_rows);
    println!("  keywords   {}", summary.keywords);

    Ok(())
}
