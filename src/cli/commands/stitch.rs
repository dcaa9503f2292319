//! Stitch command: build long-range series and write the analytics db.

use std::path::Path;

use console::style;

use crate::repository::TrendsRepository;
use crate::stitch::{self, AnalyticsDb};

pub fn cmd_stitch(
    db: &Path,
    k_id: i64,
    geo: Option<&str>,
    output: &Path,
) -> anyhow::Result<()> {
    let repo = TrendsRepository::new(db)?;

    let keyword = repo
        .keyword(k_id)?
        .ok_or_else(|| anyhow::anyhow!("no keyword with id {}", k_id))?;
    println!("Stitching {} ({})", style(keyword.pretty()).bold(), k_id);

    let geos: Vec<Option<String>> = match geo {
        Some(iso) => vec![Some(iso.to_string())],
        None => repo.fragment_geos(k_id)?,
    };
    anyhow::ensure!(
        !geos.is_empty(),
        "no completed fragments for keyword {}",
        k_id
    );

    let mut analytics = AnalyticsDb::open(output)?;
    let mut written = 0;
    for geo in geos {
        let state = geo.as_deref().unwrap_or("world");
        match stitch::stitch_keyword_location(&repo, k_id, geo.as_deref())? {
            Some(series) => {
                analytics.write_series(k_id, state, &series)?;
                println!("{} {}: {} points", style("✓").green(), state, series.len());
                written += 1;
            }
            None => {
                println!("{} {}: nothing stitchable", style("!").yellow(), state);
            }
        }
    }

    println!(
        "Wrote {} series for keyword {} to {}",
        written,
        k_id,
        output.display()
    );
    Ok(())
}
