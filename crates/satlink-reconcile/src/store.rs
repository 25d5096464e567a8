//! Snapshot store.
//!
//! Snapshots are delimited numeric grids in one directory. Each file name
//! carries an ordinal (the first run of digits in its stem) that fixes the
//! processing order; files without one sort last, by name.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use satlink_topology::VisibilityMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Optional transform applied to every snapshot after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatrixFilter {
    /// Use the snapshot as is.
    #[default]
    None,
    /// Attach each column node to its nearest row node only.
    NearestPerColumn,
}

impl MatrixFilter {
    pub fn apply(self, matrix: VisibilityMatrix) -> VisibilityMatrix {
        match self {
            MatrixFilter::None => matrix,
            MatrixFilter::NearestPerColumn => matrix.nearest_per_column(),
        }
    }
}

/// A snapshot file discovered in the input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub ordinal: Option<u64>,
    pub path: PathBuf,
}

impl SnapshotEntry {
    /// File name for logs.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// A loaded, validated snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub ordinal: Option<u64>,
    pub source: PathBuf,
    pub matrix: Arc<VisibilityMatrix>,
}

/// Ordered sequence of snapshot files with a read cursor.
#[derive(Debug)]
pub struct MatrixStore {
    dir: PathBuf,
    delimiter: char,
    filter: MatrixFilter,
    entries: Vec<SnapshotEntry>,
    cursor: usize,
}

impl MatrixStore {
    /// Index every `*.<extension>` file in `dir`.
    ///
    /// A missing directory is a startup error. An empty one is allowed here;
    /// callers decide whether that is fatal.
    pub fn open(dir: impl AsRef<Path>, extension: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(Error::InputDirectory(dir));
        }

        let digits = Regex::new(r"\d+")?;
        let mut entries = Vec::new();
        let read = std::fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))?;
        for item in read {
            let path = item.map_err(|e| Error::io(&dir, e))?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            let ordinal = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|stem| digits.find(stem))
                .and_then(|m| m.as_str().parse().ok());
            entries.push(SnapshotEntry { ordinal, path });
        }

        // Numbered files ascending, then unnumbered by name
        entries.sort_by(|a, b| {
            let key = |e: &SnapshotEntry| (e.ordinal.is_none(), e.ordinal, e.path.clone());
            key(a).cmp(&key(b))
        });

        tracing::info!("Indexed {} snapshot(s) in {:?}", entries.len(), dir);
        Ok(Self {
            dir,
            delimiter: ',',
            filter: MatrixFilter::None,
            entries,
            cursor: 0,
        })
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_filter(mut self, filter: MatrixFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All entries in processing order.
    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    /// Entries not yet handed out by [`next_snapshot`](Self::next_snapshot).
    pub fn remaining(&self) -> usize {
        self.entries.len() - self.cursor
    }

    /// Advance the cursor and load the next snapshot.
    ///
    /// The entry is returned alongside the load result so a failed load can
    /// still be reported by name. `None` once every entry was consumed.
    pub async fn next_snapshot(&mut self) -> Option<(SnapshotEntry, Result<Snapshot>)> {
        let entry = self.entries.get(self.cursor)?.clone();
        self.cursor += 1;
        let loaded = self.load(&entry).await;
        Some((entry, loaded))
    }

    /// Load one entry with this store's delimiter and filter.
    pub async fn load(&self, entry: &SnapshotEntry) -> Result<Snapshot> {
        let mut snapshot = Self::load_file(&entry.path, self.delimiter, self.filter).await?;
        snapshot.ordinal = entry.ordinal;
        Ok(snapshot)
    }

    /// Load a single snapshot file outside any store.
    pub async fn load_file(
        path: impl AsRef<Path>,
        delimiter: char,
        filter: MatrixFilter,
    ) -> Result<Snapshot> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        let matrix = filter.apply(VisibilityMatrix::parse(&text, delimiter)?);
        Ok(Snapshot {
            ordinal: None,
            source: path.to_path_buf(),
            matrix: Arc::new(matrix),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satlink_topology::{TopologyError, NO_LINK};

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn missing_directory_is_startup_error() {
        let err = MatrixStore::open("/definitely/not/here", "csv").unwrap_err();
        assert!(matches!(err, Error::InputDirectory(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn entries_sort_by_embedded_ordinal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "matrix_10.csv", "0\n");
        write(dir.path(), "matrix_2.csv", "0\n");
        write(dir.path(), "zzz.csv", "0\n");
        write(dir.path(), "aaa.csv", "0\n");
        write(dir.path(), "matrix_1.csv", "0\n");
        write(dir.path(), "matrix_3.txt", "0\n");

        let store = MatrixStore::open(dir.path(), "csv").unwrap();
        let names: Vec<_> = store.entries().iter().map(SnapshotEntry::name).collect();
        assert_eq!(
            names,
            vec!["matrix_1.csv", "matrix_2.csv", "matrix_10.csv", "aaa.csv", "zzz.csv"]
        );
        assert_eq!(store.entries()[2].ordinal, Some(10));
        assert_eq!(store.entries()[3].ordinal, None);
    }

    #[tokio::test]
    async fn next_snapshot_walks_in_order_and_reports_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "t1.csv", "-1,5\n5,-1\n");
        write(dir.path(), "t2.csv", "-1,oops\n5,-1\n");
        write(dir.path(), "t3.csv", "");

        let mut store = MatrixStore::open(dir.path(), "csv").unwrap();
        assert_eq!(store.remaining(), 3);

        let (entry, first) = store.next_snapshot().await.unwrap();
        assert_eq!(entry.ordinal, Some(1));
        let first = first.unwrap();
        assert_eq!(first.ordinal, Some(1));
        assert_eq!(first.matrix.dims(), (2, 2));

        let (_, second) = store.next_snapshot().await.unwrap();
        assert!(matches!(
            second,
            Err(Error::Topology(TopologyError::InvalidCell { .. }))
        ));

        let (_, third) = store.next_snapshot().await.unwrap();
        assert!(matches!(third, Err(Error::Topology(TopologyError::EmptyMatrix))));

        assert!(store.next_snapshot().await.is_none());
        assert_eq!(store.remaining(), 0);
    }

    #[tokio::test]
    async fn filter_applies_on_load() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a1.csv", "4,9\n2,9\n");
        let snapshot = MatrixStore::load_file(
            dir.path().join("a1.csv"),
            ',',
            MatrixFilter::NearestPerColumn,
        )
        .await
        .unwrap();
        assert_eq!(snapshot.matrix.row(0), &[NO_LINK, 9.0]);
        assert_eq!(snapshot.matrix.row(1), &[2.0, 9.0]);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = MatrixStore::load_file("/nope/x.csv", ',', MatrixFilter::None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(!err.is_fatal());
    }
}
