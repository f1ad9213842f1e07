//! Raw output logs kept for failed runs.
//!
//! A [`TestLog`] truncates any stale file of the same name on creation and is
//! meant to be [`discard`](TestLog::discard)ed once the run it records has
//! succeeded, so a log directory ends up holding failures only.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use crate::runner::CommandOutput;

pub struct TestLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl TestLog {
    /// Creates `dir/file_name`, creating `dir` if needed and replacing any
    /// previous file.
    pub fn create(dir: &Path, file_name: &str) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Log file name for an integration test file found under `root`.
    ///
    /// The path relative to `root` is flattened with `__` between folders and
    /// the extension replaced by `.log`, so `a/login_test.dart` and
    /// `b/login_test.dart` get `a__login_test.log` and `b__login_test.log`.
    pub fn name_for(test_file: &Path, root: &Path) -> String {
        let relative = test_file.strip_prefix(root).unwrap_or(test_file);
        let mut parts: Vec<String> = relative
            .parent()
            .into_iter()
            .flat_map(Path::components)
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        parts.push(
            relative
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "integration_test".to_string()),
        );
        format!("{}.log", parts.join("__"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{}", line)
    }

    /// Writes a finished command's exit status, stdout and stderr.
    pub fn write_output(&mut self, output: &CommandOutput) -> io::Result<()> {
        writeln!(self.writer, "# finished with {}", output.describe_exit())?;
        writeln!(self.writer, "# stdout")?;
        self.writer.write_all(output.stdout.as_bytes())?;
        writeln!(self.writer, "\n# stderr")?;
        self.writer.write_all(output.stderr.as_bytes())?;
        self.writer.flush()
    }

    /// Flushes and keeps the file, returning its path.
    pub fn keep(mut self) -> io::Result<PathBuf> {
        self.writer.flush()?;
        Ok(self.path)
    }

    /// Deletes the file.
    pub fn discard(self) -> io::Result<()> {
        let Self { path, writer } = self;
        drop(writer);
        std::fs::remove_file(path)
    }
}
