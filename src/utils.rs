use anyhow::Result;
use fs_err::File;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Creates a progress bar for monitoring function progress.
pub fn progress_bar_for_count(count: usize) -> ProgressBar {
    let style = ProgressStyle::with_template(
        "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {human_pos}/{human_len} ({per_sec}, {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(count as u64).with_style(style)
}

pub fn write_json_file<T: Serialize>(file_name: &str, output_directory: &Path, data: T) -> Result<()> {
    let path = output_directory.join(format!("{file_name}.json"));
    info!("Writing to {}", path.display());
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &data)?;
    writer.flush()?;
    Ok(())
}

/// Makes a project name safe to use as a single path component. `None`
/// when nothing is left or the name refers to a directory itself.
pub fn path_component(name: &str) -> Option<String> {
    let component = name.trim().replace(['/', '\\'], "_");
    match component.as_str() {
        "" | "." | ".." => None,
        _ => Some(component),
    }
}
