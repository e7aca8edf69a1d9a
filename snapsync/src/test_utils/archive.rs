use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::snapshot::DOCUMENTS_FILE_NAME;

/// Builds export archives laid out like the ones produced by the snapshot source.
#[derive(Debug, Default, Clone)]
pub struct ArchiveBuilder {
    entries: Vec<(String, Vec<u8>)>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `<name>/documents.jsonl` holding one line per entry of `lines`.
    pub fn table(self, name: &str, lines: &[&str]) -> Self {
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        self.file(&format!("{name}/{DOCUMENTS_FILE_NAME}"), &content)
    }

    /// Adds an arbitrary entry.
    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.entries.push((path.to_owned(), content.as_bytes().to_vec()));
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();

        for (path, content) in &self.entries {
            writer.start_file(path.as_str(), options).unwrap();
            writer.write_all(content).unwrap();
        }

        writer.finish().unwrap().into_inner()
    }

    pub fn write_to(&self, path: &Path) {
        std::fs::write(path, self.to_bytes()).unwrap();
    }

    /// Writes the archive to a temporary file removed on drop.
    pub fn write(&self) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        self.write_to(file.path());
        file
    }
}
