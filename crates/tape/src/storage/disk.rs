use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use spool_core::{Error, Variable, Vector};
use tempfile::TempDir;
use tracing::{debug, warn};

const SHAPES_FILE: &str = "shapes.json";

/// Values persisted as one JSON artifact per variable.
///
/// Each artifact is named from the variable's identity. A side table,
/// `shapes.json`, maps every artifact to the shape of its payload and is
/// rewritten whenever an artifact is added or removed. Every write is synced
/// to disk before it returns.
#[derive(Debug)]
pub(crate) struct DiskTier {
    dir: PathBuf,
    shapes: BTreeMap<String, Vec<usize>>,
    _temp: Option<TempDir>,
}

impl DiskTier {
    /// Opens a tier in a fresh temporary directory.
    pub(crate) fn temporary() -> Result<Self, Error> {
        let temp = tempfile::Builder::new()
            .prefix("spool-")
            .tempdir()
            .map_err(|e| Error::storage("<tempdir>", e))?;
        Ok(Self {
            dir: temp.path().to_path_buf(),
            shapes: BTreeMap::new(),
            _temp: Some(temp),
        })
    }

    /// Opens a tier in `dir`, creating it if needed.
    pub(crate) fn in_dir(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| Error::storage(dir.display().to_string(), e))?;
        Ok(Self {
            dir,
            shapes: BTreeMap::new(),
            _temp: None,
        })
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn len(&self) -> usize {
        self.shapes.len()
    }

    pub(crate) fn write(&mut self, variable: &Variable, value: &Vector) -> Result<(), Error> {
        let artifact = variable.artifact_name();
        let path = self.artifact_path(&artifact);

        let file = File::create(&path).map_err(|e| Error::storage(&artifact, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &value.to_vec())
            .map_err(|e| Error::storage(&artifact, e))?;
        writer.flush().map_err(|e| Error::storage(&artifact, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| Error::storage(&artifact, e))?;

        self.shapes.insert(artifact.clone(), vec![value.len()]);
        self.save_shapes()?;

        debug!(%variable, artifact = %artifact, "wrote checkpoint artifact");
        Ok(())
    }

    pub(crate) fn read(&self, variable: &Variable) -> Result<Option<Vector>, Error> {
        let artifact = variable.artifact_name();
        let Some(shape) = self.shapes.get(&artifact) else {
            return Ok(None);
        };

        let file = File::open(self.artifact_path(&artifact))
            .map_err(|e| Error::storage(&artifact, e))?;
        let values: Vec<f64> = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::storage(&artifact, e))?;

        if *shape != vec![values.len()] {
            return Err(Error::storage(
                &artifact,
                ShapeMismatch {
                    expected: shape.clone(),
                    actual: values.len(),
                },
            ));
        }
        Ok(Some(Vector::from(values)))
    }

    pub(crate) fn remove(&mut self, variable: &Variable) -> Result<(), Error> {
        let artifact = variable.artifact_name();
        if self.shapes.remove(&artifact).is_none() {
            return Ok(());
        }
        fs::remove_file(self.artifact_path(&artifact)).map_err(|e| Error::storage(&artifact, e))?;
        self.save_shapes()
    }

    /// Removes every artifact and the side table.
    pub(crate) fn clear(&mut self) -> Result<(), Error> {
        for artifact in std::mem::take(&mut self.shapes).into_keys() {
            fs::remove_file(self.artifact_path(&artifact))
                .map_err(|e| Error::storage(&artifact, e))?;
        }
        let table = self.dir.join(SHAPES_FILE);
        if table.exists() {
            fs::remove_file(&table).map_err(|e| Error::storage(SHAPES_FILE, e))?;
        }
        Ok(())
    }

    fn artifact_path(&self, artifact: &str) -> PathBuf {
        self.dir.join(format!("{artifact}.json"))
    }

    fn save_shapes(&self) -> Result<(), Error> {
        let file =
            File::create(self.dir.join(SHAPES_FILE)).map_err(|e| Error::storage(SHAPES_FILE, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.shapes)
            .map_err(|e| Error::storage(SHAPES_FILE, e))?;
        writer.flush().map_err(|e| Error::storage(SHAPES_FILE, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| Error::storage(SHAPES_FILE, e))
    }
}

impl Drop for DiskTier {
    fn drop(&mut self) {
        if let Err(err) = self.clear() {
            warn!(dir = %self.dir.display(), %err, "failed to remove checkpoint artifacts");
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("payload has {actual} entries but the shape table says {expected:?}")]
struct ShapeMismatch {
    expected: Vec<usize>,
    actual: usize,
}
