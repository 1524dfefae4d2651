use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum StrataError {
    #[error("unknown project: {0}")]
    UnknownProject(String),

    #[error("cannot parse metadata sheet {file}: {reason}")]
    SheetParse { file: String, reason: String },

    #[error("coercion failed for field {field} (value `{value}'): {reason}")]
    Coercion {
        field: String,
        value: String,
        reason: String,
    },

    #[error("malformed manifest line {line} in {file}")]
    ManifestLine { file: String, line: usize },

    #[error("invalid pattern {name}: {reason}")]
    InvalidPattern { name: String, reason: String },

    #[error("linkage field {0} missing from record")]
    LinkageField(String),

    #[error("package identity collision on `{identity}': claimed by {first} and {second}")]
    IdentityConflict {
        identity: String,
        first: String,
        second: String,
    },

    #[error("no classifier pattern matched: {0}")]
    UnclassifiedFilename(String),

    #[error("expected exactly one match for {pattern}, found {count}")]
    AmbiguousGlob { pattern: String, count: usize },

    #[error("downloads password not set: please export {0}")]
    MissingCredential(String),

    #[error("mirror request failed: {0}")]
    MirrorHttp(String),

    #[error("mirror returned status {status}: {message}")]
    MirrorStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
