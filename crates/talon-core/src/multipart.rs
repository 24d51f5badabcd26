//! `multipart/form-data` is an explicit black-box seam: this crate defines
//! the boundary but never decodes a multipart body itself. A caller who
//! needs multipart support supplies a [`MultipartDecoder`] implementation;
//! one who doesn't gets [`crate::error::Error::NoMultipartForm`] the first
//! time it's needed.

/// A decoded multipart field: either a plain form value or a file part.
#[derive(Debug, Clone)]
pub struct MultipartField {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// The result of decoding a `multipart/form-data` body.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    pub fields: Vec<MultipartField>,
}

impl MultipartForm {
    pub fn value(&self, name: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|f| f.name == name && f.file_name.is_none())
            .map(|f| f.data.as_slice())
    }

    pub fn file(&self, name: &str) -> Option<&MultipartField> {
        self.fields
            .iter()
            .find(|f| f.name == name && f.file_name.is_some())
    }
}

/// External collaborator hook for decoding `multipart/form-data` bodies.
///
/// This crate has no default implementation: multipart decoding (boundary
/// scanning, part-header parsing, streaming large file parts to temp
/// storage) is scoped out and left to whatever crate the caller already
/// trusts for it.
pub trait MultipartDecoder: Send + Sync {
    /// Decodes a complete multipart body given its `Content-Type` boundary
    /// parameter and the raw body bytes.
    fn decode(&self, boundary: &str, body: &[u8]) -> crate::error::Result<MultipartForm>;
}
