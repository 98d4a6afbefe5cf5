//! A large, reusable decode target.
//!
//! [`Student`] carries a 4 KiB remark buffer, which makes allocating a fresh
//! one per decode noticeably more expensive than reusing a pooled one.
//! [`decode_into`] writes every field of an existing record, so a record taken
//! from a [`ResourcePool`](super::ResourcePool) never leaks data from its
//! previous use.

use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

/// Size of the remark buffer in bytes
pub const REMARK_LEN: usize = 4096;

/// Error type for record encoding and decoding
#[derive(Debug, Error)]
pub enum RecordError {
    /// The input is not a valid record document
    #[error("Failed to decode record: {0}")]
    Decode(#[from] serde_json::Error),

    /// The remark holds more bytes than the buffer can
    #[error("Remark too long: {len} bytes (max {max})")]
    RemarkTooLong {
        /// Number of bytes in the input
        len: usize,
        /// Buffer capacity
        max: usize,
    },
}

/// A student record with a fixed-size remark buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Student {
    /// Student name
    pub name: String,

    /// Student age
    pub age: i32,

    /// Free-form remark, always `REMARK_LEN` bytes
    pub remark: Vec<u8>,
}

impl Student {
    /// Create a record with an empty remark
    pub fn new(name: impl Into<String>, age: i32) -> Self {
        Self {
            name: name.into(),
            age,
            remark: vec![0; REMARK_LEN],
        }
    }

    /// Encode as JSON
    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl Default for Student {
    fn default() -> Self {
        Self::new("", 0)
    }
}

/// Decode `input` over `target`, overwriting every field.
///
/// Fields missing from the input are reset to their defaults and the remark
/// is zero-filled past the decoded bytes. The name and remark buffers are
/// reused. On error, `target` may hold a mix of old and new values and must be
/// decoded again before use.
pub fn decode_into(target: &mut Student, input: &[u8]) -> Result<(), RecordError> {
    let mut overflow = None;
    let mut deserializer = serde_json::Deserializer::from_slice(input);

    StudentSeed {
        target,
        overflow: &mut overflow,
    }
    .deserialize(&mut deserializer)?;
    deserializer.end()?;

    match overflow {
        Some(len) => Err(RecordError::RemarkTooLong {
            len,
            max: REMARK_LEN,
        }),
        None => Ok(()),
    }
}

/// Decode `input` into a newly allocated record
pub fn decode_fresh(input: &[u8]) -> Result<Student, RecordError> {
    let mut student = Student::default();
    decode_into(&mut student, input)?;
    Ok(student)
}

const FIELDS: &[&str] = &["Name", "Age", "Remark"];

struct StudentSeed<'a> {
    target: &'a mut Student,
    overflow: &'a mut Option<usize>,
}

impl<'de, 'a> DeserializeSeed<'de> for StudentSeed<'a> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_struct("Student", FIELDS, self)
    }
}

impl<'de, 'a> Visitor<'de> for StudentSeed<'a> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a student record")
    }

    fn visit_map<A>(self, mut map: A) -> Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        let StudentSeed { target, overflow } = self;
        let mut name = false;
        let mut age = false;
        let mut remark = false;

        while let Some(key) = map.next_key::<Field>()? {
            match key {
                Field::Name => {
                    if name {
                        return Err(de::Error::duplicate_field("Name"));
                    }
                    name = true;
                    map.next_value_seed(NameSeed {
                        buffer: &mut target.name,
                    })?;
                }
                Field::Age => {
                    if age {
                        return Err(de::Error::duplicate_field("Age"));
                    }
                    age = true;
                    target.age = map.next_value()?;
                }
                Field::Remark => {
                    if remark {
                        return Err(de::Error::duplicate_field("Remark"));
                    }
                    remark = true;
                    map.next_value_seed(RemarkSeed {
                        buffer: &mut target.remark,
                        overflow: &mut *overflow,
                    })?;
                }
                Field::Other => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        if !name {
            target.name.clear();
        }
        if !age {
            target.age = 0;
        }
        if !remark {
            target.remark.clear();
            target.remark.resize(REMARK_LEN, 0);
        }
        Ok(())
    }
}

enum Field {
    Name,
    Age,
    Remark,
    Other,
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FieldVisitor;

        impl<'de> Visitor<'de> for FieldVisitor {
            type Value = Field;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a field name")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Field, E> {
                Ok(match value {
                    "Name" => Field::Name,
                    "Age" => Field::Age,
                    "Remark" => Field::Remark,
                    _ => Field::Other,
                })
            }
        }

        deserializer.deserialize_identifier(FieldVisitor)
    }
}

/// Decodes a string over an existing buffer
struct NameSeed<'a> {
    buffer: &'a mut String,
}

impl<'de, 'a> DeserializeSeed<'de> for NameSeed<'a> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(self)
    }
}

impl<'de, 'a> Visitor<'de> for NameSeed<'a> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<(), E> {
        let buffer = self.buffer;
        buffer.clear();
        buffer.push_str(value);
        Ok(())
    }
}

/// Decodes a byte array over an existing buffer, zero-filling the tail
struct RemarkSeed<'a> {
    buffer: &'a mut Vec<u8>,
    overflow: &'a mut Option<usize>,
}

impl<'de, 'a> DeserializeSeed<'de> for RemarkSeed<'a> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, 'a> Visitor<'de> for RemarkSeed<'a> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "an array of at most {} bytes", REMARK_LEN)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        let RemarkSeed { buffer, overflow } = self;
        buffer.resize(REMARK_LEN, 0);

        let mut len = 0;
        while len < REMARK_LEN {
            match seq.next_element::<u8>()? {
                Some(byte) => {
                    buffer[len] = byte;
                    len += 1;
                }
                None => {
                    buffer[len..].fill(0);
                    return Ok(());
                }
            }
        }

        // Buffer is full; count anything left so the caller can report it
        let mut extra = 0;
        while seq.next_element::<IgnoredAny>()?.is_some() {
            extra += 1;
        }
        if extra > 0 {
            *overflow = Some(REMARK_LEN + extra);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        Student::new("Geektutu", 25).encode().unwrap()
    }

    #[test]
    fn test_decode_fresh() {
        let student = decode_fresh(&sample()).unwrap();
        assert_eq!(student.name, "Geektutu");
        assert_eq!(student.age, 25);
        assert_eq!(student.remark.len(), REMARK_LEN);
        assert!(student.remark.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_into_overwrites_stale_state() {
        let mut student = Student::new("Previous borrower", 99);
        student.remark[..5].copy_from_slice(b"stale");

        decode_into(&mut student, br#"{"Name":"Ada","Remark":[1,2,3]}"#).unwrap();

        assert_eq!(student.name, "Ada");
        // Absent field reset, not kept from the previous use
        assert_eq!(student.age, 0);
        assert_eq!(&student.remark[..5], &[1, 2, 3, 0, 0]);
        assert_eq!(student.remark.len(), REMARK_LEN);
    }

    #[test]
    fn test_decode_into_matches_fresh_decode() {
        let input = sample();
        let mut pooled = Student::new("x", 1);
        pooled.remark.fill(0xff);

        decode_into(&mut pooled, &input).unwrap();
        assert_eq!(pooled, decode_fresh(&input).unwrap());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let student = decode_fresh(br#"{"Name":"Ada","Age":36,"Extra":{"a":[1]}}"#).unwrap();
        assert_eq!(student.age, 36);
    }

    #[test]
    fn test_remark_too_long() {
        let remark = vec![7u8; REMARK_LEN + 3];
        let input = serde_json::to_vec(&serde_json::json!({ "Name": "Ada", "Remark": remark }))
            .unwrap();

        let err = decode_fresh(&input).unwrap_err();
        assert!(matches!(
            err,
            RecordError::RemarkTooLong {
                len,
                max: REMARK_LEN
            } if len == REMARK_LEN + 3
        ));
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            decode_fresh(b"{\"Age\":\"old\"}"),
            Err(RecordError::Decode(_))
        ));
        assert!(decode_fresh(b"{} trailing").is_err());
    }
}
