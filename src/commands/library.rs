//! Library command implementation

use crate::error::Result;
use crate::meta::{LibraryItem, MetaDb};

/// List the video library, optionally filtered by a search term.
pub async fn cmd_library(meta: &MetaDb, search: Option<&str>) -> Result<Vec<LibraryItem>> {
    meta.list_library(search).await
}

/// Format a duration as `M:SS`.
pub fn format_duration(duration_secs: f64) -> String {
    let total = duration_secs.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Print the library listing.
pub fn print_library(items: &[LibraryItem]) {
    if items.is_empty() {
        println!("No videos indexed yet. Run 'videorag index <video>' to add one.");
        return;
    }

    for item in items {
        println!(
            "{}  [{}]  {}  ({} clips)",
            item.id,
            item.status,
            format_duration(item.duration_secs),
            item.clip_count
        );
        if let Some(description) = &item.description {
            println!("    {description}");
        }
        let tags = item.tags();
        if !tags.is_empty() {
            println!("    tags: {}", tags.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(95.0), "1:35");
        assert_eq!(format_duration(3600.0), "60:00");
    }
}
