use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};

/// A file or standard input, selected by path ("-" reads stdin).
pub struct InputReader {
    reader: Box<dyn Read>,
    name: String,
}

impl InputReader {
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let path = input_path.as_ref();

        if path.as_os_str() == "-" {
            return Ok(Self {
                reader: Box::new(io::stdin().lock()),
                name: "<stdin>".to_string(),
            });
        }

        let file = File::open(path)
            .with_context(|| format!("Failed to open input {}", path.display()))?;
        Ok(Self {
            reader: Box::new(BufReader::new(file)),
            name: path.display().to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Embedded resources are small enough to hold in memory whole.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.reader
            .read_to_end(&mut data)
            .with_context(|| format!("Failed to read {}", self.name))?;
        Ok(data)
    }
}
