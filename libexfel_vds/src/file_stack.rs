use std::path::{Path, PathBuf};

use super::error::SourceError;
use super::source_file::{SourceFile, StreamId};

/// The ordered set of files a stream wrote during one run.
///
/// The DAQ splits each stream into sequence files (`-S00000`, `-S00001`, ...). The stack is
/// the collection of all sequence files associated with a given run for that stream, in
/// sequence order.
#[derive(Debug, Clone)]
pub struct FileStack {
    pub stream: StreamId,
    pub files: Vec<PathBuf>,
    pub total_stack_size_bytes: u64,
}

impl FileStack {
    /// Find the files of an AGIPD module in a run directory
    pub fn agipd(run_dir: &Path, module_id: usize) -> Result<Self, SourceError> {
        let pattern = format!("-AGIPD{module_id:02}-S");
        Self::new(StreamId::Agipd(module_id), run_dir, &pattern)
    }

    /// Find the files of an ePix detector in a run directory
    pub fn epix(run_dir: &Path, run_number: i32, epix_id: u8) -> Result<Self, SourceError> {
        let pattern = format!("-R{run_number:0>4}-EPIX{epix_id:02}-S");
        Self::new(StreamId::Epix(epix_id), run_dir, &pattern)
    }

    fn new(stream: StreamId, run_dir: &Path, pattern: &str) -> Result<Self, SourceError> {
        let (files, bytes) = Self::get_file_stack(run_dir, pattern)?;
        Ok(Self {
            stream,
            files,
            total_stack_size_bytes: bytes,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Get all of the matching .h5 files, sorted by sequence number
    fn get_file_stack(
        parent_path: &Path,
        pattern: &str,
    ) -> Result<(Vec<PathBuf>, u64), SourceError> {
        let mut file_list: Vec<(usize, PathBuf)> = Vec::new();
        let mut total_bytes = 0;
        for item in parent_path.read_dir()? {
            let item = item?;
            let name = item.file_name();
            let name = name.to_string_lossy();
            if !name.contains(pattern) {
                continue;
            }
            if let Some(sequence) = SourceFile::parse_sequence(&name) {
                total_bytes += item.metadata()?.len();
                file_list.push((sequence, item.path()));
            }
        }
        file_list.sort();
        Ok((
            file_list.into_iter().map(|(_, path)| path).collect(),
            total_bytes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_discovery_order_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "RAW-R0007-AGIPD03-S00010.h5",
            "RAW-R0007-AGIPD03-S00002.h5",
            "RAW-R0007-AGIPD13-S00000.h5",
            "RAW-R0007-EPIX01-S00000.h5",
            "RAW-R0007-AGIPD03-S00001.txt",
        ] {
            File::create(dir.path().join(name)).unwrap();
        }

        let stack = FileStack::agipd(dir.path(), 3).unwrap();
        let names: Vec<String> = stack
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["RAW-R0007-AGIPD03-S00002.h5", "RAW-R0007-AGIPD03-S00010.h5"]
        );

        assert_eq!(FileStack::epix(dir.path(), 7, 1).unwrap().files.len(), 1);
        assert!(FileStack::epix(dir.path(), 7, 2).unwrap().is_empty());
        assert!(FileStack::agipd(dir.path(), 5).unwrap().is_empty());
    }
}
