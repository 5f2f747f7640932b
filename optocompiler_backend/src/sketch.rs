// Placing compiled sketches in an Arduino sketchbook.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;

/// Directory for a new sketch inside `sketchbook`.
///
/// With a save file the directory is named after it (`exp.json` → `exp`); an existing directory
/// is only reused when `overwrite` is set. Without a save file the first free
/// `optoplate96_config_NNNN` is picked.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use optocompiler_backend::sketch::sketch_dir;
///
/// let dir = sketch_dir(Path::new("/tmp/does-not-exist"), Some(Path::new("runs/exp1.json")), false);
/// assert_eq!(dir.unwrap(), Path::new("/tmp/does-not-exist/exp1"));
/// ```
pub fn sketch_dir(sketchbook: &Path, save_path: Option<&Path>, overwrite: bool) -> Result<PathBuf> {
    match save_path.and_then(Path::file_stem) {
        Some(stem) => {
            let dir = sketchbook.join(stem);
            if dir.exists() && !overwrite {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("An Arduino sketch already exists at {}.", dir.display()),
                )
                .into());
            }
            Ok(dir)
        }
        None => Ok((1..)
            .map(|i| sketchbook.join(format!("optoplate96_config_{:04}", i)))
            .find(|dir| !dir.exists())
            .unwrap_or_else(|| sketchbook.join("optoplate96_config"))),
    }
}

/// Writes `code` to `<dir>/<dir name>.ino`, creating `dir` as needed. Returns the file path.
pub fn write_sketch(dir: &Path, code: &str) -> Result<PathBuf> {
    let name = dir.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a sketch directory", dir.display()),
        )
    })?;
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.ino", name.to_string_lossy()));
    fs::write(&path, code)?;
    info!("wrote sketch to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use crate::error::Error;
    use crate::sketch::*;

    #[test]
    fn numbered_directories() {
        let book = tempfile::tempdir().unwrap();
        let first = sketch_dir(book.path(), None, false).unwrap();
        assert_eq!(first, book.path().join("optoplate96_config_0001"));
        fs::create_dir(&first).unwrap();
        let second = sketch_dir(book.path(), None, false).unwrap();
        assert_eq!(second, book.path().join("optoplate96_config_0002"));
    }

    #[test]
    fn existing_sketch_needs_overwrite() {
        let book = tempfile::tempdir().unwrap();
        let save = Path::new("exp.json");
        let dir = sketch_dir(book.path(), Some(save), false).unwrap();
        let ino = write_sketch(&dir, "void setup() {}\n").unwrap();
        assert_eq!(ino, book.path().join("exp").join("exp.ino"));
        assert_eq!(fs::read_to_string(&ino).unwrap(), "void setup() {}\n");

        assert!(matches!(
            sketch_dir(book.path(), Some(save), false),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists
        ));
        assert_eq!(sketch_dir(book.path(), Some(save), true).unwrap(), dir);
    }
}
