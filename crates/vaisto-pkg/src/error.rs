use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PkgError {
    #[error("I/O error: {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no .va sources found in {0}")]
    NoSources(PathBuf),

    #[error("duplicate module name `{name}` ({first} and {second})")]
    DuplicateModule {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("module `{importer}` imports unknown module `{imported}`")]
    UnknownModule { importer: String, imported: String },

    #[error("dependency cycle involving module `{0}`")]
    DependencyCycle(String),
}
