//! Type-safe wrappers for the driver's volume addressing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HandleError;

/// Separator between the file system id and the subpath in a volume handle.
pub const HANDLE_SEPARATOR: char = ':';

/// An opaque CSI volume handle in the form "fs-id" or "fs-id:subpath".
///
/// The driver consumes the encoded string directly. Decoding exists for
/// diagnostics only. A handle without a subpath addresses the file system root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeHandle(String);

impl VolumeHandle {
    /// Encode a file system id and an optional subpath into a handle.
    ///
    /// An empty subpath yields the file system id unchanged. Neither part may
    /// contain [`HANDLE_SEPARATOR`], otherwise decoding would split the handle
    /// in the wrong place.
    pub fn encode(file_system_id: &str, subpath: &str) -> Result<Self, HandleError> {
        if file_system_id.is_empty() {
            return Err(HandleError::EmptyFileSystemId);
        }
        if file_system_id.contains(HANDLE_SEPARATOR) {
            return Err(HandleError::SeparatorInFileSystemId {
                file_system_id: file_system_id.to_string(),
            });
        }
        if subpath.contains(HANDLE_SEPARATOR) {
            return Err(HandleError::SeparatorInSubpath {
                subpath: subpath.to_string(),
            });
        }

        if subpath.is_empty() {
            Ok(Self(file_system_id.to_string()))
        } else {
            Ok(Self(format!("{file_system_id}{HANDLE_SEPARATOR}{subpath}")))
        }
    }

    /// Split the handle on the first separator into (file system id, subpath).
    ///
    /// The subpath is empty for a root handle.
    pub fn decode(&self) -> (&str, &str) {
        self.0.split_once(HANDLE_SEPARATOR).unwrap_or((self.0.as_str(), ""))
    }

    /// Get the file system id portion of the handle.
    pub fn file_system_id(&self) -> &str {
        self.decode().0
    }

    /// Get the subpath portion of the handle, if any.
    pub fn subpath(&self) -> Option<&str> {
        match self.decode().1 {
            "" => None,
            subpath => Some(subpath),
        }
    }

    /// Get the full handle as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_without_subpath_is_the_file_system_id() {
        let handle = VolumeHandle::encode("fs-0123456789abcdef", "").unwrap();
        assert_eq!(handle.as_str(), "fs-0123456789abcdef");
        assert_eq!(handle.subpath(), None);
    }

    #[test]
    fn encode_with_subpath_joins_with_separator() {
        let handle = VolumeHandle::encode("fs-0123456789abcdef", "/a").unwrap();
        assert_eq!(handle.as_str(), "fs-0123456789abcdef:/a");
        assert_eq!(handle.file_system_id(), "fs-0123456789abcdef");
        assert_eq!(handle.subpath(), Some("/a"));
    }

    #[test]
    fn decode_inverts_encode() {
        let cases = [
            ("fs-1", ""),
            ("fs-1", "/a"),
            ("fs-1", "a"),
            ("fs-1", "/deeply/nested/dir"),
            ("fs-1", "/with space"),
        ];
        for (fs, subpath) in cases {
            let handle = VolumeHandle::encode(fs, subpath).unwrap();
            assert_eq!(handle.decode(), (fs, subpath), "handle {handle}");
        }
    }

    #[test]
    fn encode_rejects_separator_in_subpath() {
        let err = VolumeHandle::encode("fs-1", "/a:b").unwrap_err();
        assert_eq!(
            err,
            HandleError::SeparatorInSubpath {
                subpath: "/a:b".to_string()
            }
        );
    }

    #[test]
    fn encode_rejects_bad_file_system_id() {
        assert_eq!(
            VolumeHandle::encode("", "/a").unwrap_err(),
            HandleError::EmptyFileSystemId
        );
        assert!(matches!(
            VolumeHandle::encode("fs:1", ""),
            Err(HandleError::SeparatorInFileSystemId { .. })
        ));
    }

    #[test]
    fn handle_serializes_as_plain_string() {
        let handle = VolumeHandle::encode("fs-1", "/b").unwrap();
        assert_eq!(serde_json::to_string(&handle).unwrap(), "\"fs-1:/b\"");
    }
}
