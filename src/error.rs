pub type Error = KeepsakeError;
pub type Result<T> = std::result::Result<T, Error>;

/// A macro to simplify the creation of `KeepsakeError` variants.
/// It automatically injects source code metadata (file and line) into every error.
#[macro_export]
macro_rules! keepsake_error {
    // Case 1: Handles variants with named fields.
    // (e.g., keepsake_error!(Variant { field1: value1, field2: value2 }))
    ($variant:ident { $($field:ident : $value:expr),* $(,)? }) => {{
        $crate::KeepsakeError::$variant {
            $($field: $value,)*
            meta: $crate::ErrorMeta::new($crate::ErrorLocation::new(file!(), line!())),
        }
    }};
    // Case 2: Handles variants without additional fields
    // (e.g., keepsake_error!(Timeout))
    ($variant:ident) => {{
        $crate::KeepsakeError::$variant {
            meta: $crate::ErrorMeta::new($crate::ErrorLocation::new(file!(), line!())),
        }
    }};
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorLocation {
    file: &'static str,
    line: u32,
}

impl ErrorLocation {
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }
}

impl Default for ErrorLocation {
    fn default() -> Self {
        Self {
            file: "<unknown>",
            line: 0,
        }
    }
}

impl std::fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone)]
pub struct ErrorMeta {
    pub location: ErrorLocation,
    pub contexts: Vec<(String, ErrorLocation)>,
}

impl ErrorMeta {
    pub fn new(location: ErrorLocation) -> Self {
        Self {
            location,
            contexts: Vec::new(),
        }
    }
}

impl Default for ErrorMeta {
    #[track_caller]
    fn default() -> Self {
        let location = std::panic::Location::caller();
        Self::new(ErrorLocation::new(location.file(), location.line()))
    }
}

impl std::fmt::Display for ErrorMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            return write!(f, "(at {})", self.location);
        }
        if self.contexts.is_empty() {
            return Ok(());
        }
        let mut iter = self.contexts.iter().rev();
        if let Some(context) = iter.next() {
            write!(f, "{} (at {})", context.0, context.1)?;
        }
        for context in iter {
            write!(f, "\n  - caused by: {} (at {})", context.0, context.1)?;
        }
        write!(f, "\n  - caused by: ")?;
        Ok(())
    }
}

/// Generates the central KeepsakeError enum.
macro_rules! keepsake_error_variants {
    ($( $variant:ident { $( $(#[$field_attr:meta])* $field:ident : $ty:ty ),* $(,)? } => $message:expr ),* $(,)?) => {
        #[derive(thiserror::Error, Debug)]
        pub enum KeepsakeError {
            $(
                #[error($message)]
                $variant {
                    $( $(#[$field_attr])* $field: $ty, )*
                },
            )*
        }

        impl KeepsakeError {
            /// Provides mutable access to the internal error context/metadata.
            fn contexts_mut(&mut self) -> &mut Vec<(String, ErrorLocation)> {
                match self {
                    $( KeepsakeError::$variant { meta, .. } => &mut meta.contexts, )*
                }
            }
        }
    };
}

keepsake_error_variants! {
    IoError {
        #[source]
        source: std::io::Error,
        meta: ErrorMeta,
    } => "{meta}I/O error: {source} {meta:#}",
    InvalidParameter {
        description: String,
        meta: ErrorMeta,
    } => "{meta}Invalid parameter error: {description} {meta:#}",
    DecryptionError {
        description: String,
        meta: ErrorMeta,
    } => "{meta}Decryption error: {description} {meta:#}",
    UnsupportedProvider {
        provider: String,
        meta: ErrorMeta,
    } => "{meta}Unsupported key management provider: {provider} {meta:#}",
    SourceBackupError {
        description: String,
        meta: ErrorMeta,
    } => "{meta}Source backup error: {description} {meta:#}",
    ConversionError {
        description: String,
        meta: ErrorMeta,
    } => "{meta}Conversion error: {description} {meta:#}",
    UploadError {
        artifact: String,
        description: String,
        meta: ErrorMeta,
    } => "{meta}Upload of {artifact} failed: {description} {meta:#}",
    StoreError {
        description: String,
        meta: ErrorMeta,
    } => "{meta}Object store error: {description} {meta:#}",
    EncryptionError {
        description: String,
        meta: ErrorMeta,
    } => "{meta}Encryption error: {description} {meta:#}",
    ArchiveError {
        description: String,
        meta: ErrorMeta,
    } => "{meta}Archive error: {description} {meta:#}",
    ToolError {
        program: String,
        #[source]
        source: std::io::Error,
        meta: ErrorMeta,
    } => "{meta}Failed to run {program}: {source} {meta:#}",
}

/// Internal helper to conditionally convert a field value.
macro_rules! keepsake_error_from_value {
    ($field:ident) => {
        $field
    };
    ($field:ident, $conv:expr) => {
        $conv($field)
    };
}

/// Automatically implements From<ExternalError> for KeepsakeError.
macro_rules! keepsake_error_from {
    ($( #[from] $variant:ident ( $field:ident : $ty:ty $(=> $conv:expr)? ) ),* $(,)?) => {
        $(
            impl From<$ty> for KeepsakeError {
                #[track_caller]
                fn from($field: $ty) -> Self {
                    let location = std::panic::Location::caller();
                    KeepsakeError::$variant {
                        $field: keepsake_error_from_value!($field $(, $conv)?),
                        meta: ErrorMeta::new(ErrorLocation::new(location.file(), location.line())),
                    }
                }
            }
        )*
    };
}

keepsake_error_from! {
    #[from] IoError(source: std::io::Error),
    #[from] InvalidParameter(description: serde_yaml::Error => |e: serde_yaml::Error| e.to_string()),
    #[from] InvalidParameter(description: serde_json::Error => |e: serde_json::Error| e.to_string()),
    #[from] ArchiveError(description: zip::result::ZipError => |e: zip::result::ZipError| e.to_string()),
    #[from] ArchiveError(description: walkdir::Error => |e: walkdir::Error| e.to_string()),
}

impl KeepsakeError {
    #[track_caller]
    pub fn context(self, message: impl Into<String>) -> Self {
        let location = std::panic::Location::caller();
        self.context_at(message, location)
    }

    pub fn context_at(
        mut self,
        message: impl Into<String>,
        location: &'static std::panic::Location<'static>,
    ) -> Self {
        self.contexts_mut().push((
            message.into(),
            ErrorLocation::new(location.file(), location.line()),
        ));
        self
    }
}

/// Extension trait to add context to Results.
pub trait ResultExt<T> {
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<KeepsakeError>,
{
    #[track_caller]
    fn context(self, message: impl Into<String>) -> Result<T> {
        let location = std::panic::Location::caller();
        self.map_err(|e| e.into().context_at(message, location))
    }
}
