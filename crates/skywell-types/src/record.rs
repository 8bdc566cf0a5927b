//! The `dev.skywell.file` record schema.

use serde::{Deserialize, Serialize};

use crate::ident::{Cid, ParseError};

/// A `{"$link": "<cid>"}` reference as it appears in lexicon JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidLink {
    /// The referenced CID string.
    #[serde(rename = "$link")]
    pub link: String,
}

/// A lexicon blob reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// Always `"blob"`.
    #[serde(rename = "$type", default = "blob_type")]
    pub kind: String,
    /// CID of the blob content.
    #[serde(rename = "ref")]
    pub reference: CidLink,
    /// MIME type declared by the uploader.
    pub mime_type: String,
    /// Size in bytes.
    pub size: i64,
}

fn blob_type() -> String {
    "blob".to_string()
}

impl Blob {
    /// Builds a blob reference from stored columns.
    pub fn new(cid: &str, mime_type: &str, size: i64) -> Self {
        Self {
            kind: blob_type(),
            reference: CidLink {
                link: cid.to_string(),
            },
            mime_type: mime_type.to_string(),
            size,
        }
    }
}

/// A `dev.skywell.file` record exactly as received on the wire.
///
/// Every field is optional at this stage; [`FileRecord::validate`] enforces
/// what the index requires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Display name of the file.
    #[serde(default)]
    pub name: String,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Author-claimed creation time (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// The attached blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_ref: Option<Blob>,
}

/// A file record whose required fields have been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFile {
    /// Display name.
    pub name: String,
    /// Description; empty when the record had none.
    pub description: String,
    /// Author-claimed creation time, as sent.
    pub created_at: String,
    /// CID of the attached blob.
    pub blob_ref: Cid,
    /// MIME type of the attached blob.
    pub mime_type: String,
    /// Size of the attached blob in bytes.
    pub size: i64,
}

impl FileRecord {
    /// Decodes a record from the opaque JSON payload of a commit.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` when the payload is not an object of the
    /// expected shape.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    /// Checks the author timestamp and blob reference.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MissingField`] if `createdAt` or `blobRef` is
    /// absent, [`ParseError::InvalidDatetime`] if `createdAt` is not RFC 3339,
    /// and [`ParseError::InvalidCid`] if the blob link is not a CID.
    pub fn validate(self) -> Result<ValidatedFile, ParseError> {
        let created_at = self.created_at.ok_or(ParseError::MissingField("createdAt"))?;
        if chrono::DateTime::parse_from_rfc3339(&created_at).is_err() {
            return Err(ParseError::InvalidDatetime(created_at));
        }

        let blob = self.blob_ref.ok_or(ParseError::MissingField("blobRef"))?;
        let blob_ref = Cid::parse(&blob.reference.link)?;

        Ok(ValidatedFile {
            name: self.name,
            description: self.description.unwrap_or_default(),
            created_at,
            blob_ref,
            mime_type: blob.mime_type,
            size: blob.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BLOB_CID: &str = "bafkreibme22gw2h7y2h7tg2fhqotaqjucnbc24deqo72b6mkl2egezxhvy";

    fn record_json() -> serde_json::Value {
        json!({
            "$type": "dev.skywell.file",
            "name": "a.pdf",
            "description": "quarterly report",
            "createdAt": "2025-06-01T12:00:00.000Z",
            "blobRef": {
                "$type": "blob",
                "ref": { "$link": BLOB_CID },
                "mimeType": "application/pdf",
                "size": 4096
            }
        })
    }

    #[test]
    fn validates_complete_record() {
        let record = FileRecord::from_value(&record_json()).unwrap();
        let file = record.validate().unwrap();
        assert_eq!(file.name, "a.pdf");
        assert_eq!(file.description, "quarterly report");
        assert_eq!(file.blob_ref.as_str(), BLOB_CID);
        assert_eq!(file.mime_type, "application/pdf");
        assert_eq!(file.size, 4096);
    }

    #[test]
    fn missing_description_is_empty() {
        let mut value = record_json();
        value.as_object_mut().unwrap().remove("description");
        let file = FileRecord::from_value(&value).unwrap().validate().unwrap();
        assert_eq!(file.description, "");
    }

    #[test]
    fn missing_blob_is_rejected() {
        let mut value = record_json();
        value.as_object_mut().unwrap().remove("blobRef");
        let err = FileRecord::from_value(&value).unwrap().validate().unwrap_err();
        assert_eq!(err, ParseError::MissingField("blobRef"));
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let mut value = record_json();
        value["createdAt"] = json!("yesterday");
        let err = FileRecord::from_value(&value).unwrap().validate().unwrap_err();
        assert!(matches!(err, ParseError::InvalidDatetime(_)));
    }

    #[test]
    fn bad_blob_link_is_rejected() {
        let mut value = record_json();
        value["blobRef"]["ref"]["$link"] = json!("not a cid");
        let err = FileRecord::from_value(&value).unwrap().validate().unwrap_err();
        assert!(matches!(err, ParseError::InvalidCid(_)));
    }

    #[test]
    fn blob_serializes_as_lexicon_blob() {
        let blob = Blob::new(BLOB_CID, "image/png", 12);
        let value = serde_json::to_value(&blob).unwrap();
        assert_eq!(value["$type"], "blob");
        assert_eq!(value["ref"]["$link"], BLOB_CID);
        assert_eq!(value["mimeType"], "image/png");
        assert_eq!(value["size"], 12);
    }
}
