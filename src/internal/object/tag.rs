//! The (annotated) tag object. Archive releases (spec §3) are reconstructed
//! as tag objects pointing at the release's target; lightweight releases
//! (no message/tagger) never reach here, they're written directly as refs.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;

use crate::errors::VaultError;
use crate::hash::ObjectId;
use crate::internal::object::ObjectTrait;
use crate::internal::object::signature::Signature;
use crate::internal::object::types::ObjectType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub target: ObjectId,
    pub target_type: ObjectType,
    pub name: String,
    pub tagger: Option<Signature>,
    pub message: String,
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "object {}", self.target)?;
        writeln!(f, "type {}", self.target_type)?;
        writeln!(f, "tag {}", self.name)?;
        if let Some(tagger) = &self.tagger {
            writeln!(f, "tagger {tagger}")?;
        }
        writeln!(f, "{}", self.message)
    }
}

impl ObjectTrait for Tag {
    fn from_bytes(data: &[u8]) -> Result<Self, VaultError> {
        let err = |msg: &str| VaultError::MalformedObject(format!("tag: {msg}"));

        let mut cursor = 0usize;
        let object_line_end = data[cursor..]
            .find_byte(0x0a)
            .ok_or_else(|| err("missing object line"))?;
        let object_line = &data[cursor..cursor + object_line_end];
        cursor += object_line_end + 1;
        if !object_line.starts_with(b"object ") {
            return Err(err("expected `object` line first"));
        }
        let target = ObjectId::from_str(
            object_line[7..]
                .to_str()
                .map_err(|_| err("target id is not utf-8"))?,
        )
        .map_err(|e| err(&e))?;

        let type_line_end = data[cursor..]
            .find_byte(0x0a)
            .ok_or_else(|| err("missing type line"))?;
        let type_line = &data[cursor..cursor + type_line_end];
        cursor += type_line_end + 1;
        if !type_line.starts_with(b"type ") {
            return Err(err("expected `type` line second"));
        }
        let target_type = ObjectType::from_str(
            type_line[5..]
                .to_str()
                .map_err(|_| err("type is not utf-8"))?,
        )?;

        let name_line_end = data[cursor..]
            .find_byte(0x0a)
            .ok_or_else(|| err("missing tag line"))?;
        let name_line = &data[cursor..cursor + name_line_end];
        cursor += name_line_end + 1;
        if !name_line.starts_with(b"tag ") {
            return Err(err("expected `tag` line third"));
        }
        let name = String::from_utf8_lossy(&name_line[4..]).into_owned();

        let mut tagger = None;
        if data[cursor..].starts_with(b"tagger ") {
            let tagger_line_end = data[cursor..]
                .find_byte(0x0a)
                .ok_or_else(|| err("unterminated tagger line"))?;
            tagger = Some(Signature::from_data(
                data[cursor..cursor + tagger_line_end].to_vec(),
            )?);
            cursor += tagger_line_end + 1;
        }

        // Blank line separates the header from the free-form message.
        if data.get(cursor) == Some(&0x0a) {
            cursor += 1;
        }
        let message = String::from_utf8_lossy(&data[cursor..]).into_owned();

        Ok(Tag {
            target,
            target_type,
            name,
            tagger,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn to_data(&self) -> Result<Vec<u8>, VaultError> {
        let mut data = Vec::new();
        data.extend(b"object ");
        data.extend(self.target.as_hex().as_bytes());
        data.push(0x0a);
        data.extend(b"type ");
        data.extend(self.target_type.to_bytes());
        data.push(0x0a);
        data.extend(b"tag ");
        data.extend(self.name.as_bytes());
        data.push(0x0a);
        if let Some(tagger) = &self.tagger {
            data.extend(b"tagger ");
            data.extend(tagger.to_data()?);
            data.push(0x0a);
        }
        data.push(0x0a);
        data.extend(self.message.as_bytes());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tag {
        Tag {
            target: ObjectId::from_str("341e54913a3a43069f2927cc0f703e5a9f730df1").unwrap(),
            target_type: ObjectType::Commit,
            name: "v1.0".to_string(),
            tagger: Some(Signature::new(
                "swh-vault, git-bare cooker",
                "robot@softwareheritage.org",
                1700000000,
            )),
            message: "release notes\n".to_string(),
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let tag = sample();
        let data = tag.to_data().unwrap();
        let reparsed = Tag::from_bytes(&data).unwrap();
        assert_eq!(reparsed, tag);
    }

    #[test]
    fn tagger_is_optional() {
        let mut tag = sample();
        tag.tagger = None;
        let data = tag.to_data().unwrap();
        let reparsed = Tag::from_bytes(&data).unwrap();
        assert_eq!(reparsed.tagger, None);
    }
}
