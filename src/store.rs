use std::fs;
use std::io::{self, BufReader, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::error::KiraError;
use crate::taxonomy::Taxonomy;

#[derive(Debug, Clone)]
pub struct TaxonomyFile {
    path: Utf8PathBuf,
}

impl TaxonomyFile {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.as_std_path().exists()
    }

    pub fn load(&self) -> Result<Taxonomy, KiraError> {
        let file = fs::File::open(self.path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", self.path)))?;
        Taxonomy::read(BufReader::new(file))
    }

    pub fn load_or_default(&self) -> Result<Taxonomy, KiraError> {
        match fs::File::open(self.path.as_std_path()) {
            Ok(file) => Taxonomy::read(BufReader::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Taxonomy::new()),
            Err(err) => Err(KiraError::Filesystem(format!("open {}: {err}", self.path))),
        }
    }

    /// Written to a temporary file next to the destination, then renamed
    /// over it.
    pub fn save(&self, taxonomy: &Taxonomy) -> Result<(), KiraError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
            _ => Utf8PathBuf::from("."),
        };
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix("kira-tax")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;

        let mut writer = BufWriter::new(temp.as_file());
        taxonomy.write(&mut writer)?;
        writer
            .flush()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        drop(writer);

        temp.persist(self.path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
