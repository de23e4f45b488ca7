use std::path::PathBuf;

use chrono::{NaiveDate, Utc};

use crate::core::error::FetchError;
use crate::models::source::SourceRef;

const BOM: &str = "\u{FEFF}";
const HEADER: [&str; 7] = ["Name", "Views", "Likes", "Comments", "Duration", "Type", "URL"];

/// Receives the batch description before any transfer starts.
pub trait ManifestExporter: Send + Sync {
    fn export(&self, items: &[SourceRef]) -> Result<(), FetchError>;
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Renders the whole manifest, BOM included, rows in selection order.
pub fn render_manifest(items: &[SourceRef]) -> String {
    let mut lines = Vec::with_capacity(items.len() + 1);
    lines.push(HEADER.join(","));

    for item in items {
        let row = [
            quote(&item.title),
            item.views.to_string(),
            item.likes.to_string(),
            item.comments.to_string(),
            item.duration_seconds.to_string(),
            quote(&item.kind.to_string()),
            quote(&item.url),
        ];
        lines.push(row.join(","));
    }

    format!("{}{}", BOM, lines.join("\n"))
}

pub fn manifest_filename(items: &[SourceRef], date: NaiveDate) -> String {
    let platform = items
        .first()
        .map(|i| i.platform.to_string())
        .unwrap_or_else(|| "videos".to_string());
    format!("{}_download_{}.csv", platform, date.format("%Y-%m-%d"))
}

/// Writes the manifest into a directory, named after the first item's platform
/// and today's date.
pub struct CsvManifest {
    dir: PathBuf,
}

impl CsvManifest {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn write(&self, items: &[SourceRef]) -> Result<PathBuf, FetchError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(manifest_filename(items, Utc::now().date_naive()));
        std::fs::write(&path, render_manifest(items))?;
        tracing::info!("[manifest] wrote {} rows to {}", items.len(), path.display());
        Ok(path)
    }
}

impl ManifestExporter for CsvManifest {
    fn export(&self, items: &[SourceRef]) -> Result<(), FetchError> {
        self.write(items).map(|_| ())
    }
}
