use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, SplitError};

pub const PREAMBLE: &[&[u8]] = &[
    b"SET autocommit=0;",
    b"SET unique_checks=0;",
    b"SET foreign_key_checks=0;",
];
pub const POSTAMBLE: &[&[u8]] = &[
    b"SET autocommit=1;",
    b"SET unique_checks=1;",
    b"SET foreign_key_checks=1;",
];
pub const COMMIT: &[u8] = b"COMMIT;";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Structure,
    Data,
}

impl FileKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Structure => "structure",
            Self::Data => "data",
        }
    }

    pub fn file_name(&self, seq: usize) -> String {
        format!("{}_{}.sql", self.name(), seq)
    }
}

/// Where batch files end up. Implementations create `<kind>/<kind>_<seq>.sql`
/// under their root, creating the kind directory when it is missing.
pub trait OutputTree {
    type File: Write;

    fn create(&mut self, kind: FileKind, seq: usize) -> Result<(PathBuf, Self::File)>;
}

pub struct FsTree {
    root: PathBuf,
}

impl FsTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl OutputTree for FsTree {
    type File = BufWriter<File>;

    fn create(&mut self, kind: FileKind, seq: usize) -> Result<(PathBuf, Self::File)> {
        let dir = self.root.join(kind.name());
        fs::create_dir_all(&dir).map_err(|source| SplitError::DirectoryCreation {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(kind.file_name(seq));
        let file = File::create(&path).map_err(|source| SplitError::Write {
            path: path.clone(),
            source,
        })?;
        Ok((path, BufWriter::new(file)))
    }
}

/// Dry run: names files but writes nothing.
pub struct NullTree {
    root: PathBuf,
}

impl NullTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl OutputTree for NullTree {
    type File = io::Sink;

    fn create(&mut self, kind: FileKind, seq: usize) -> Result<(PathBuf, Self::File)> {
        let path = self.root.join(kind.name()).join(kind.file_name(seq));
        Ok((path, io::sink()))
    }
}

/// A finalized output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenFile {
    pub kind: FileKind,
    pub seq: usize,
    pub path: PathBuf,
    /// Value rows (always 0 for structure files).
    pub rows: usize,
    pub lines: usize,
}

struct OpenFile<W> {
    kind: FileKind,
    seq: usize,
    path: PathBuf,
    out: W,
    rows: usize,
    lines: usize,
    template: Option<Vec<u8>>,
    // Latest row, held back until we know whether it ends the statement.
    held: Option<Vec<u8>>,
    // An INSERT statement is open and the next row continues it.
    in_statement: bool,
}

impl<W: Write> OpenFile<W> {
    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.out
            .write_all(line)
            .and_then(|()| self.out.write_all(b"\n"))
            .map_err(|source| SplitError::Write {
                path: self.path.clone(),
                source,
            })?;
        self.lines += 1;
        Ok(())
    }

    fn release_held(&mut self, rewrite: fn(&[u8]) -> Vec<u8>) -> Result<()> {
        if let Some(row) = self.held.take() {
            self.write_line(&rewrite(&row))?;
        }
        Ok(())
    }
}

/// Owns the single open output file on behalf of the state machine.
///
/// Opening a file while another is open finalizes the old one first, so at
/// most one destination is live. A file that is never closed is still released
/// when the writer drops, though without a flush error being reported.
pub struct BatchWriter<T: OutputTree> {
    tree: T,
    current: Option<OpenFile<T::File>>,
    finished: Vec<WrittenFile>,
}

impl<T: OutputTree> BatchWriter<T> {
    pub fn new(tree: T) -> Self {
        Self {
            tree,
            current: None,
            finished: Vec::new(),
        }
    }

    pub fn open(&mut self, kind: FileKind, seq: usize) -> Result<&Path> {
        if self.current.is_some() {
            self.close()?;
        }
        let (path, out) = self.tree.create(kind, seq)?;
        let file = self.current.insert(OpenFile {
            kind,
            seq,
            path,
            out,
            rows: 0,
            lines: 0,
            template: None,
            held: None,
            in_statement: false,
        });
        Ok(&file.path)
    }

    pub fn write(&mut self, line: &[u8]) -> Result<()> {
        self.current_mut()?.write_line(line)
    }

    /// Flush and release the open file. Returns `None` when nothing was open.
    pub fn close(&mut self) -> Result<Option<WrittenFile>> {
        let Some(mut file) = self.current.take() else {
            return Ok(None);
        };
        file.release_held(<[u8]>::to_vec)?;
        file.out.flush().map_err(|source| SplitError::Write {
            path: file.path.clone(),
            source,
        })?;
        let written = WrittenFile {
            kind: file.kind,
            seq: file.seq,
            path: file.path,
            rows: file.rows,
            lines: file.lines,
        };
        self.finished.push(written.clone());
        Ok(Some(written))
    }

    /// Open data batch `seq` with the transaction preamble and a blank line.
    /// `template` is written ahead of the first row of every statement.
    pub fn open_data(&mut self, seq: usize, template: Option<&[u8]>) -> Result<&Path> {
        self.open(FileKind::Data, seq)?;
        let file = self.current_mut()?;
        for line in PREAMBLE {
            file.write_line(line)?;
        }
        file.write_line(b"")?;
        file.template = template.map(<[u8]>::to_vec);
        Ok(&file.path)
    }

    /// Append a value row and return the batch's row count.
    pub fn push_row(&mut self, row: &[u8]) -> Result<usize> {
        let file = self.current_mut()?;
        if file.in_statement {
            file.release_held(continue_row)?;
        } else if let Some(template) = file.template.take() {
            let written = file.write_line(&template);
            file.template = Some(template);
            written?;
        }
        file.in_statement = true;
        file.held = Some(row.to_vec());
        file.rows += 1;
        Ok(file.rows)
    }

    /// Add the next line of a value that spans lines to the held row.
    pub fn extend_row(&mut self, line: &[u8]) -> Result<()> {
        let file = self.current_mut()?;
        match file.held.as_mut() {
            Some(held) => {
                held.push(b'\n');
                held.extend_from_slice(line);
                Ok(())
            }
            None => file.write_line(line),
        }
    }

    /// True while the held row stops short of its closing `)`, `,` or `;`.
    pub fn row_is_open(&self) -> bool {
        let Some(row) = self.current.as_ref().and_then(|f| f.held.as_deref()) else {
            return false;
        };
        !matches!(split_trailing_ws(row).0.last(), Some(b')' | b',' | b';'))
    }

    /// Write a line that is not a row, unchanged. It ends the open statement:
    /// the held row is terminated first and the next row restates the template.
    pub fn pass_through(&mut self, line: &[u8]) -> Result<()> {
        let file = self.current_mut()?;
        file.release_held(terminate_row)?;
        file.in_statement = false;
        file.write_line(line)
    }

    /// Terminate the last row, write `COMMIT;` and the restore postamble, close.
    pub fn commit_and_close(&mut self) -> Result<Option<WrittenFile>> {
        let Some(file) = self.current.as_mut() else {
            return Ok(None);
        };
        file.release_held(terminate_row)?;
        file.write_line(COMMIT)?;
        for line in POSTAMBLE {
            file.write_line(line)?;
        }
        self.close()
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Rows in the open file.
    pub fn rows(&self) -> usize {
        self.current.as_ref().map_or(0, |f| f.rows)
    }

    /// Template the open data batch was started with.
    pub fn template(&self) -> Option<&[u8]> {
        self.current.as_ref().and_then(|f| f.template.as_deref())
    }

    pub fn into_files(self) -> Vec<WrittenFile> {
        self.finished
    }

    fn current_mut(&mut self) -> Result<&mut OpenFile<T::File>> {
        self.current.as_mut().ok_or_else(|| SplitError::Write {
            path: PathBuf::new(),
            source: io::Error::new(io::ErrorKind::NotConnected, "no batch file is open"),
        })
    }
}

/// Make `row` the last one of its statement. Only a trailing `,` is
/// rewritten; anything else is left as the dump wrote it.
pub fn terminate_row(row: &[u8]) -> Vec<u8> {
    swap_separator(row, b',', b';')
}

/// A row followed by another row in the same statement must end in `,`.
pub fn continue_row(row: &[u8]) -> Vec<u8> {
    swap_separator(row, b';', b',')
}

fn swap_separator(row: &[u8], from: u8, to: u8) -> Vec<u8> {
    let (body, tail) = split_trailing_ws(row);
    let mut out = body.to_vec();
    if let Some(last) = out.last_mut().filter(|b| **b == from) {
        *last = to;
    }
    out.extend_from_slice(tail);
    out
}

fn split_trailing_ws(row: &[u8]) -> (&[u8], &[u8]) {
    let end = row
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    row.split_at(end)
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryTree;
    use super::*;

    #[test]
    fn terminate() {
        assert_eq!(terminate_row(b"(1,2),"), b"(1,2);");
        assert_eq!(terminate_row(b"(1,2);"), b"(1,2);");
        assert_eq!(terminate_row(b"(1,2),  "), b"(1,2);  ");
        // Rows without a trailing comma are never appended to.
        assert_eq!(terminate_row(b"(1,2)"), b"(1,2)");
        assert_eq!(terminate_row(b"(2,'line one"), b"(2,'line one");
    }

    #[test]
    fn continue_statement() {
        assert_eq!(continue_row(b"(1,2);"), b"(1,2),");
        assert_eq!(continue_row(b"(1,2),"), b"(1,2),");
        assert_eq!(continue_row(b"(1,2)"), b"(1,2)");
    }

    #[test]
    fn data_batch_layout() {
        let tree = MemoryTree::default();
        let mut w = BatchWriter::new(tree.clone());
        w.open_data(1, Some(b"INSERT INTO `t` VALUES")).unwrap();
        assert_eq!(w.push_row(b"(1,'a'),").unwrap(), 1);
        assert_eq!(w.push_row(b"(2,'b'),").unwrap(), 2);
        let done = w.commit_and_close().unwrap().unwrap();

        assert_eq!(done.rows, 2);
        assert_eq!(done.kind, FileKind::Data);
        assert_eq!(
            tree.text("data/data_1.sql"),
            "SET autocommit=0;\n\
             SET unique_checks=0;\n\
             SET foreign_key_checks=0;\n\
             \n\
             INSERT INTO `t` VALUES\n\
             (1,'a'),\n\
             (2,'b');\n\
             COMMIT;\n\
             SET autocommit=1;\n\
             SET unique_checks=1;\n\
             SET foreign_key_checks=1;\n"
        );
        assert!(!w.is_open());
    }

    #[test]
    fn pass_through_ends_statement() {
        let tree = MemoryTree::default();
        let mut w = BatchWriter::new(tree.clone());
        w.open_data(1, Some(b"INSERT INTO `t` VALUES")).unwrap();
        w.push_row(b"(1),").unwrap();
        w.pass_through(b"STRAY;").unwrap();
        w.push_row(b"(2),").unwrap();
        w.pass_through(b"UNLOCK TABLES;").unwrap();
        w.commit_and_close().unwrap();

        let text = tree.text("data/data_1.sql");
        assert!(
            text.contains(
                "INSERT INTO `t` VALUES\n(1);\nSTRAY;\n\
                 INSERT INTO `t` VALUES\n(2);\nUNLOCK TABLES;\nCOMMIT;\n"
            ),
            "{text}"
        );
    }

    #[test]
    fn pass_through_before_first_row() {
        let tree = MemoryTree::default();
        let mut w = BatchWriter::new(tree.clone());
        w.open_data(1, Some(b"INSERT INTO `t` VALUES")).unwrap();
        w.pass_through(b"LOCK TABLES `t` WRITE;").unwrap();
        w.push_row(b"(1);").unwrap();
        w.commit_and_close().unwrap();

        let text = tree.text("data/data_1.sql");
        assert!(text.contains("\n\nLOCK TABLES `t` WRITE;\nINSERT INTO `t` VALUES\n(1);\n"), "{text}");
    }

    #[test]
    fn multi_line_row() {
        let tree = MemoryTree::default();
        let mut w = BatchWriter::new(tree.clone());
        w.open_data(1, Some(b"INSERT INTO `t` VALUES")).unwrap();
        w.push_row(b"(1,'line one").unwrap();
        assert!(w.row_is_open());
        w.extend_row(b"line two'),").unwrap();
        assert!(!w.row_is_open());
        assert_eq!(w.rows(), 1);
        w.commit_and_close().unwrap();

        let text = tree.text("data/data_1.sql");
        assert!(text.contains("VALUES\n(1,'line one\nline two');\nCOMMIT;\n"), "{text}");
    }

    #[test]
    fn write_failure_names_the_file() {
        use super::memory::FailingTree;

        let mut w = BatchWriter::new(FailingTree { fail: FileKind::Data });
        w.open(FileKind::Structure, 1).unwrap();
        w.write(b"CREATE TABLE `t` (").unwrap();
        let err = w.open_data(1, None).unwrap_err();
        match err {
            SplitError::Write { path, source } => {
                assert_eq!(path, Path::new("data").join("data_1.sql"));
                assert_eq!(source.to_string(), "No space left on device");
            }
            other => panic!("got {other:?}"),
        }
    }

    #[test]
    fn opening_closes_previous() {
        let tree = MemoryTree::default();
        let mut w = BatchWriter::new(tree.clone());
        w.open(FileKind::Structure, 1).unwrap();
        w.write(b"CREATE TABLE `t` (").unwrap();
        w.open_data(1, None).unwrap();
        w.commit_and_close().unwrap();

        let files = w.into_files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].kind, FileKind::Structure);
        assert_eq!(files[0].lines, 1);
        assert_eq!(tree.names(), vec!["data/data_1.sql", "structure/structure_1.sql"]);
    }

    #[test]
    fn write_without_open_file_fails() {
        let mut w = BatchWriter::new(MemoryTree::default());
        let err = w.write(b"x").unwrap_err();
        assert!(matches!(err, SplitError::Write { .. }));
        assert!(w.close().unwrap().is_none());
        assert!(w.commit_and_close().unwrap().is_none());
    }

    #[test]
    fn fs_tree_creates_directories_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();

        let mut w = BatchWriter::new(FsTree::new(dir.path()));
        let path = w.open(FileKind::Structure, 1).unwrap().to_path_buf();
        w.write(b"CREATE TABLE `t` (").unwrap();
        w.close().unwrap();
        w.open_data(1, Some(b"INSERT INTO `t` VALUES")).unwrap();
        w.push_row(b"(1),").unwrap();
        w.commit_and_close().unwrap();

        assert_eq!(path, dir.path().join("structure").join("structure_1.sql"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "CREATE TABLE `t` (\n");
        let data = fs::read_to_string(dir.path().join("data/data_1.sql")).unwrap();
        assert!(data.contains("INSERT INTO `t` VALUES\n(1);\nCOMMIT;\n"));
    }

    #[test]
    fn fs_tree_reports_directory_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the kind directory should go.
        fs::write(dir.path().join("data"), b"").unwrap();

        let mut w = BatchWriter::new(FsTree::new(dir.path()));
        let err = w.open_data(1, None).unwrap_err();
        assert!(matches!(err, SplitError::DirectoryCreation { .. }), "got {err:?}");
    }

    #[test]
    fn null_tree_names_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = BatchWriter::new(NullTree::new(dir.path()));
        w.open_data(3, Some(b"INSERT INTO `t` VALUES")).unwrap();
        w.push_row(b"(1),").unwrap();
        let done = w.commit_and_close().unwrap().unwrap();

        assert_eq!(done.path, dir.path().join("data").join("data_3.sql"));
        assert_eq!(done.rows, 1);
        assert!(!dir.path().join("data").exists());
    }
}
