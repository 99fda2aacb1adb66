/// Errors raised while building or binding a [`crate::ComputationModel`].
///
/// `NotInSection`, `SectionOverlap` and `SectionOrientation` are produced by binders that validate
/// band layout; the compiler only passes them through.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("duplicate definition of `{name}`")]
    DuplicateDefinition { name: String },
    #[error("name not found: `{name}`")]
    NameNotFound { name: String },
    #[error("cell `{cell}` is not inside section `{section}`")]
    NotInSection { cell: String, section: String },
    #[error("sections `{first}` and `{second}` overlap")]
    SectionOverlap { first: String, second: String },
    #[error("section `{section}` does not match the orientation of its enclosing section")]
    SectionOrientation { section: String },
}
