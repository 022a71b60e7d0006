use console::{style, Emoji};
use std::fmt::Display;

use crate::error::TopoError;

pub static CHECK: Emoji<'static, 'static> = Emoji("✓", "v");
pub static CROSS: Emoji<'static, 'static> = Emoji("✗", "x");
pub static ARROW: Emoji<'static, 'static> = Emoji("▶", ">");

pub fn check_icon() -> String {
    style(format!("{}", CHECK)).green().to_string()
}

pub fn cross_icon() -> String {
    style(format!("{}", CROSS)).red().to_string()
}

pub fn bold<T: AsRef<str>>(text: T) -> String {
    style(text.as_ref()).bold().to_string()
}

pub fn error<T: AsRef<str>>(text: T) -> String {
    style(text.as_ref()).red().to_string()
}

pub fn warning<T: AsRef<str>>(text: T) -> String {
    style(text.as_ref()).color256(214).bold().to_string()
}

pub fn success<T: AsRef<str>>(text: T) -> String {
    style(text.as_ref()).green().to_string()
}

pub fn highlight<T: AsRef<str>>(text: T) -> String {
    style(text.as_ref()).blue().bold().to_string()
}

pub fn light<T: AsRef<str>>(text: T) -> String {
    style(text.as_ref()).color256(245).to_string()
}

// One line per skipped coarse cell, e.g. "! Cell 6720 skipped (degenerate_slope): ..."
pub fn skipped_cell(station_id: &str, reason: &TopoError) -> String {
    format!(
        "  {} Cell {} skipped ({}): {}",
        warning("!"),
        bold(station_id),
        reason.kind(),
        light(reason.to_string())
    )
}

/// Indented `label value` line of the configuration and summary blocks.
pub fn field_line<T: Display>(label: &str, value: T) -> String {
    format!("  {:<24} {}", label, value)
}

/// `title` followed by one tree line per written file.
pub fn output_list(title: &str, file_names: &[&str]) -> String {
    let mut out = title.to_string();
    for name in file_names {
        out.push_str(&format!("\n  {}", light(format!("└─{} {}", ARROW, name))));
    }
    out
}

/// Share of the DEM pixels holding a value in an output raster.
pub fn coverage(written: usize, total: usize) -> String {
    format!(
        "{} of {} pixels ({:.1}%)",
        written,
        total,
        100.0 * written as f64 / total.max(1) as f64
    )
}
