use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,

    /// Two cluster declarations share a name.
    #[error("cluster `{0}` is declared more than once")]
    DuplicateClusterDeclaration(String),

    /// A cluster declaration has no name.
    #[error("a cluster declaration is missing its `name`")]
    UnnamedClusterDeclaration,

    /// An interval or timeout was configured as zero.
    #[error("`{0}` must be greater than zero")]
    ZeroDuration(&'static str),
}
