//! Log reader: streams records from a single log file, tolerating a
//! truncated trailing record (§4.4).

use std::path::{Path, PathBuf};

use crate::codec::filenames::parse_log_filename;
use crate::codec::log_format::{parse_log_header, read_log_record, ReadOutcome, HEADER_LEN};
use crate::codec::log_format::LogRecord;
use crate::error::Result;

/// One well-named log file discovered by [`list_log_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileEntry {
    /// Bare filename.
    pub filename: String,
    /// Full path.
    pub path: PathBuf,
    /// Instance that wrote the file.
    pub instance_id: String,
}

/// Read every record in a log file, skipping an invalid trailing partial
/// record. Fails with `CorruptHeader` if the header itself is unreadable.
pub async fn read_all(path: &Path) -> Result<Vec<LogRecord>> {
    let bytes = tokio::fs::read(path).await?;
    parse_log_header(path, &bytes)?;
    let mut records = Vec::new();
    let mut offset = HEADER_LEN;
    loop {
        match read_log_record(&bytes[offset..]) {
            ReadOutcome::Record { record, consumed } => {
                records.push(record);
                offset += consumed;
            }
            ReadOutcome::Finalized { .. } => break,
            ReadOutcome::Truncated => break,
        }
    }
    Ok(records)
}

/// Enumerate every well-named `<instanceId>_<timestamp>.crdtlog` file in a
/// directory.
pub async fn list_log_files(dir: &Path) -> Result<Vec<LogFileEntry>> {
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(parsed) = parse_log_filename(name) {
            out.push(LogFileEntry {
                filename: name.to_string(),
                path: entry.path(),
                instance_id: parsed.instance_id,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::writer::LogWriter;

    #[tokio::test]
    async fn read_all_returns_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogWriter::new(dir.path(), "inst-1", 10 * 1024 * 1024);
        let (path, _) = writer.append_record(1000, 0, b"a").await.unwrap();
        writer.append_record(1001, 1, b"b").await.unwrap();
        writer.finalize().await.unwrap();

        let records = read_all(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data, b"a");
        assert_eq!(records[1].data, b"b");
    }

    #[tokio::test]
    async fn read_all_skips_truncated_trailing_record() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogWriter::new(dir.path(), "inst-1", 10 * 1024 * 1024);
        let (path, _) = writer.append_record(1000, 0, b"a").await.unwrap();
        writer.append_record(1001, 1, b"good").await.unwrap();

        let mut bytes = tokio::fs::read(&path).await.unwrap();
        bytes.truncate(bytes.len() - 2);
        tokio::fs::write(&path, &bytes).await.unwrap();

        let records = read_all(&path).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, b"a");
    }

    #[tokio::test]
    async fn list_log_files_filters_unparseable_names() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("inst-1_1000.crdtlog"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("not-a-log.txt"), b"x").await.unwrap();
        let entries = list_log_files(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].instance_id, "inst-1");
    }
}
