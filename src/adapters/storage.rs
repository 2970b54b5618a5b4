use crate::domain::model::{AggregateRow, BilateralRow};
use crate::domain::ports::Storage;
use crate::utils::error::{EtlError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const AGGREGATE_FILE: &str = "aggregate.csv";
pub const BILATERAL_FILE: &str = "bilateral.csv";

#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: String,
}

impl LocalStorage {
    pub fn new(base_path: String) -> Self {
        Self { base_path }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        Path::new(&self.base_path).join(path)
    }
}

impl Storage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.full_path(path)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EtlError::IoError(e)),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // write beside the target, then rename over it
        let mut tmp_name = full_path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &full_path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(EtlError::IoError(e));
        }
        Ok(())
    }
}

/// The two persisted tables of every reporter, stored as CSV under
/// `<reporter>/aggregate.csv` and `<reporter>/bilateral.csv`.
#[derive(Debug, Clone)]
pub struct TableStore<S: Storage> {
    storage: S,
}

impl<S: Storage> TableStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn table_path(reporter: &str, file: &str) -> String {
        format!("{}/{}", reporter.to_ascii_lowercase(), file)
    }

    pub async fn load_aggregate(&self, reporter: &str) -> Result<Vec<AggregateRow>> {
        self.load(&Self::table_path(reporter, AGGREGATE_FILE)).await
    }

    pub async fn load_bilateral(&self, reporter: &str) -> Result<Vec<BilateralRow>> {
        self.load(&Self::table_path(reporter, BILATERAL_FILE)).await
    }

    pub async fn save_aggregate(&self, reporter: &str, rows: &[AggregateRow]) -> Result<()> {
        self.save(&Self::table_path(reporter, AGGREGATE_FILE), rows).await
    }

    pub async fn save_bilateral(&self, reporter: &str, rows: &[BilateralRow]) -> Result<()> {
        self.save(&Self::table_path(reporter, BILATERAL_FILE), rows).await
    }

    async fn load<R: DeserializeOwned>(&self, path: &str) -> Result<Vec<R>> {
        match self.storage.read_file(path).await? {
            Some(bytes) => decode_rows(&bytes),
            None => Ok(Vec::new()),
        }
    }

    async fn save<R: Serialize>(&self, path: &str, rows: &[R]) -> Result<()> {
        let data = encode_rows(rows)?;
        tracing::debug!(path, rows = rows.len(), bytes = data.len(), "writing table");
        self.storage.write_file(path, &data).await
    }
}

pub fn decode_rows<R: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<R>> {
    let mut reader = csv::Reader::from_reader(bytes);
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

pub fn encode_rows<R: Serialize>(rows: &[R]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| EtlError::IoError(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Currency, SectorCode};
    use tempfile::TempDir;

    fn sample_rows() -> Vec<AggregateRow> {
        vec![
            AggregateRow::new("2024-11".parse().unwrap(), "ES", SectorCode::Sitc(0), 1500.5, 900.0, Currency::Eur),
            AggregateRow::new("2024-11".parse().unwrap(), "ES", SectorCode::Total, 30000.0, 32000.0, Currency::Eur),
        ]
    }

    #[test]
    fn test_csv_layout() {
        let bytes = encode_rows(&sample_rows()).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "period,reporter,sector_code,export_value,import_value,balance,currency"
        );
        assert_eq!(lines.next().unwrap(), "2024-11-01,ES,0,1500.5,900.0,600.5,EUR");

        let back: Vec<AggregateRow> = decode_rows(&bytes).unwrap();
        assert_eq!(back, sample_rows());
    }

    #[test]
    fn test_unknown_sector_code_in_file_is_an_error() {
        let text = "period,reporter,sector_code,export_value,import_value,balance,currency\n\
                    2024-11-01,ES,42,1.0,1.0,0.0,EUR\n";
        let result: Result<Vec<AggregateRow>> = decode_rows(text.as_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn test_local_storage_round_trip_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = TableStore::new(LocalStorage::new(dir.path().to_str().unwrap().to_string()));

        tokio_test::block_on(async {
            assert!(store.load_aggregate("ES").await.unwrap().is_empty());
            store.save_aggregate("ES", &sample_rows()).await.unwrap();
            assert_eq!(store.load_aggregate("ES").await.unwrap().len(), 2);
        });

        assert!(dir.path().join("es").join(AGGREGATE_FILE).exists());
        assert!(!dir.path().join("es").join("aggregate.csv.tmp").exists());
    }
}
