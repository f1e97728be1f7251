//! Terminal styling for command output.

use console::Style;

/// Green check mark followed by `msg`.
pub fn success(msg: &str) -> String {
    format!("{} {}", Style::new().green().apply_to("✓"), msg)
}

/// Red cross followed by `msg`.
pub fn error(msg: &str) -> String {
    format!("{} {}", Style::new().red().apply_to("✗"), msg)
}

/// Yellow warning sign followed by `msg`.
pub fn warn(msg: &str) -> String {
    format!("{} {}", Style::new().yellow().apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Lock column text: the holder and expiry, or a dim "unlocked".
pub fn lock_state(holder: Option<&str>, expires: Option<&str>) -> String {
    match (holder, expires) {
        (Some(holder), Some(expires)) => format!(
            "{} {} until {}",
            Style::new().yellow().apply_to("●"),
            holder,
            expires
        ),
        _ => format!("{} unlocked", Style::new().dim().apply_to("○")),
    }
}
