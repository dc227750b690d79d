//! `targets` command: list configured targets with storage usage.

use console::style;

use crate::config;
use crate::utils::fs as fsutil;

pub fn run() -> anyhow::Result<()> {
    let global = config::load_global_config()?;

    if global.targets.is_empty() {
        println!("No targets configured. Run `jshunter start --target <name>` to create one.");
        return Ok(());
    }

    for (name, target) in &global.targets {
        let (files, bytes) = fsutil::dir_stats(&target.storage_dir);
        println!(
            "{}  {}",
            style(name).bold(),
            style(target.storage_dir.display()).dim()
        );
        println!("    {} files, {}", files, format_size(bytes));
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
