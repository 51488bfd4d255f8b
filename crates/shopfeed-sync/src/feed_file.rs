//! # Feed Files
//!
//! Tab-delimited UTF-8 files handed to the feed upload endpoint. The header
//! row comes first; every following row follows the header's column order.

use csv::{QuoteStyle, Writer, WriterBuilder};
use shopfeed_core::promotion::{Offer, PROMOTION_FIELDS};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Streams rows into a TSV file.
pub struct FeedFileWriter {
    path: PathBuf,
    writer: Writer<File>,
    rows: usize,
}

impl FeedFileWriter {
    /// Creates the file (and its directory) and writes the header.
    pub fn create<S: AsRef<str>>(path: impl Into<PathBuf>, header: &[S]) -> SyncResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::FeedFile(format!("{}: {}", parent.display(), e)))?;
        }

        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(QuoteStyle::Necessary)
            .from_path(&path)?;
        writer.write_record(header.iter().map(|h| h.as_ref()))?;

        Ok(FeedFileWriter {
            path,
            writer,
            rows: 0,
        })
    }

    pub fn write_row<S: AsRef<str>>(&mut self, row: &[S]) -> SyncResult<()> {
        self.writer.write_record(row.iter().map(|c| c.as_ref()))?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes the file and returns its path and data row count.
    pub fn finish(mut self) -> SyncResult<(PathBuf, usize)> {
        self.writer
            .flush()
            .map_err(|e| SyncError::FeedFile(format!("{}: {}", self.path.display(), e)))?;
        debug!(path = %self.path.display(), rows = self.rows, "Feed file written");
        Ok((self.path, self.rows))
    }
}

/// Writes offers under the fixed promotion header.
pub fn write_promotions(path: &Path, offers: &[Offer]) -> SyncResult<usize> {
    let mut writer = FeedFileWriter::create(path, PROMOTION_FIELDS)?;
    for offer in offers {
        writer.write_row(&offer.to_row())?;
    }
    let (_, rows) = writer.finish()?;
    Ok(rows)
}

/// Builds `{dir}/{store}_{kind}_{timestamp}.tsv`.
pub fn feed_path(dir: &Path, store_id: &str, kind: &str) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let safe_store: String = store_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    dir.join(format!("{}_{}_{}.tsv", safe_store, kind, stamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopfeed_core::feed::FeedRecord;
    use shopfeed_core::inventory::Availability;
    use std::collections::BTreeMap;

    fn record(id: &str, title: &str) -> FeedRecord {
        FeedRecord {
            id: id.to_string(),
            title: title.to_string(),
            description: "Soft cotton".to_string(),
            availability: Availability::InStock,
            inventory: 4,
            condition: "new".to_string(),
            price: "9.99 USD".to_string(),
            unit_price: String::new(),
            link: String::new(),
            image_link: String::new(),
            brand: "Northwind".to_string(),
            google_product_category: String::new(),
            item_group_id: Some("TEE".to_string()),
            status: "active".to_string(),
            custom: BTreeMap::from([("color".to_string(), "Red".to_string())]),
        }
    }

    #[test]
    fn test_writer_rows_follow_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("products.tsv");
        let header = ["id", "title", "availability", "price", "item_group_id", "color"];

        let mut writer = FeedFileWriter::create(path.clone(), &header).unwrap();
        for r in [record("TEE-S", "Tee S"), record("TEE-M", "Tee\tM")] {
            writer.write_row(&r.to_row(&header)).unwrap();
        }
        let (written, rows) = writer.finish().unwrap();
        assert_eq!(written, path);
        assert_eq!(rows, 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "id\ttitle\tavailability\tprice\titem_group_id\tcolor");
        assert_eq!(lines[1], "TEE-S\tTee S\tin stock\t9.99 USD\tTEE\tRed");
        // Embedded delimiter gets quoted
        assert_eq!(lines[2], "TEE-M\t\"Tee\tM\"\tin stock\t9.99 USD\tTEE\tRed");
    }

    #[test]
    fn test_header_only_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promotions.tsv");

        let rows = write_promotions(&path, &[]).unwrap();
        assert_eq!(rows, 0);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.starts_with("offer_id\t"));
    }

    #[test]
    fn test_feed_path_sanitizes_store() {
        let path = feed_path(Path::new("/tmp/feeds"), "eu/main", "products");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("eu_main_products_"));
        assert!(name.ends_with(".tsv"));
    }
}
