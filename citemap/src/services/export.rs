//! Row-per-citation CSV export

use crate::models::AnnotatedRecord;
use std::io::Write;
use std::path::Path;

/// Column headers, in output order
pub const CSV_HEADERS: [&str; 7] = [
    "citing author",
    "citing paper",
    "cited paper",
    "affiliation",
    "latitude",
    "longitude",
    "country",
];

/// Write `records` to `path`, creating parent directories; null fields are empty cells
pub fn write_citation_csv(path: &Path, records: &[AnnotatedRecord]) -> Result<(), csv::Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    write_citation_rows(file, records)?;
    tracing::info!(path = %path.display(), rows = records.len(), "Citation table written");
    Ok(())
}

/// Write header plus one row per record to any writer
pub fn write_citation_rows<W: Write>(writer: W, records: &[AnnotatedRecord]) -> Result<(), csv::Error> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(CSV_HEADERS)?;

    for record in records {
        let (latitude, longitude, country) = match &record.location {
            Some(point) => (
                point.latitude.to_string(),
                point.longitude.to_string(),
                point.country.clone().unwrap_or_default(),
            ),
            None => (String::new(), String::new(), String::new()),
        };
        csv_writer.write_record([
            record.citing_author.as_str(),
            record.citing_paper.as_str(),
            record.cited_paper.as_str(),
            record.affiliation.as_deref().unwrap_or(""),
            latitude.as_str(),
            longitude.as_str(),
            country.as_str(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(())
}
