//! The metainfo loader (component G, an external collaborator per the
//! design): reads a `.torrent` file and yields the `{info_hash,
//! piece_length, total_length, pieces, files, announce_list}` tuple the
//! rest of the core treats as ground truth.
//!
//! Adapted from the teacher's `torrent.rs`/bencode crate pairing, extended
//! with BEP 12 `announce-list` support (a single `announce` key is only a
//! fallback for older torrents) and a `files()` projection that roots
//! multi-file paths under `name/` per BEP 3.

use std::path::{Path, PathBuf};

use bencode::{Bencode, BencodeDictValues};
use sha1_smol::Sha1;

use crate::piece::FileRecord;
use crate::Sha1Hash;

#[derive(Debug)]
pub struct Metainfo {
    pub info_hash: Sha1Hash,
    pub piece_length: u32,
    pub total_length: u64,
    pub pieces: Vec<Sha1Hash>,
    pub files: Vec<FileRecord>,
    pub announce_list: Vec<Vec<String>>,
}

impl Metainfo {
    pub fn load(path: &Path) -> Result<Self, MetainfoError> {
        let buffer = std::fs::read(path)?;
        Self::from_bytes(&buffer)
    }

    pub fn from_bytes(buffer: &[u8]) -> Result<Self, MetainfoError> {
        let (value, _) = Bencode::from_bytes(buffer, |s| match s {
            "pieces" => Some(20),
            _ => None,
        })
        .map_err(|e| MetainfoError::Malformed(e.to_string()))?;

        let Bencode::Dict(torrent_table) = value else {
            return Err(MetainfoError::Malformed(
                "metainfo file is not a bencoded dictionary".into(),
            ));
        };

        let announce_list = Self::parse_announce_list(&torrent_table);

        let info_value = match torrent_table.get("info") {
            Some(BencodeDictValues::Bencode(info)) => info,
            _ => return Err(MetainfoError::Malformed("missing info dictionary".into())),
        };
        let Bencode::Dict(info_table) = info_value else {
            return Err(MetainfoError::Malformed("info is not a dictionary".into()));
        };

        let name = match info_table.get("name") {
            Some(BencodeDictValues::Bencode(Bencode::String(s))) => s.clone(),
            _ => return Err(MetainfoError::Malformed("info.name missing".into())),
        };

        let piece_length = match info_table.get("piece length") {
            Some(BencodeDictValues::Bencode(Bencode::Number(n))) if *n > 0 => *n as u32,
            _ => return Err(MetainfoError::Malformed("info.piece length missing".into())),
        };

        let pieces = match info_table.get("pieces") {
            Some(BencodeDictValues::Bytes(chunks)) => chunks
                .iter()
                .map(|chunk| {
                    <[u8; 20]>::try_from(chunk.as_slice())
                        .map_err(|_| MetainfoError::Malformed("pieces hash blob misaligned".into()))
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(MetainfoError::Malformed("info.pieces missing".into())),
        };
        if pieces.is_empty() {
            return Err(MetainfoError::Malformed("torrent has zero pieces".into()));
        }

        let files = Self::parse_files(info_table, &name)?;
        let total_length: u64 = files.iter().map(|f| f.length).sum();
        if total_length == 0 {
            return Err(MetainfoError::Malformed("torrent has zero total length".into()));
        }

        let info_hash = Self::hash_info_dict(info_value);

        Ok(Self {
            info_hash,
            piece_length,
            total_length,
            pieces,
            files,
            announce_list,
        })
    }

    /// Re-encodes the `info` sub-dictionary and SHA-1-hashes the result.
    /// The bencode crate's decoder preserves key insertion order in its
    /// `IndexMap`, so re-encoding a value decoded from a well-formed
    /// metainfo file reproduces its original byte representation exactly.
    fn hash_info_dict(info: &Bencode) -> Sha1Hash {
        let encoded = info.to_bytes().expect("a decoded Bencode value always re-encodes");
        let mut hasher = Sha1::new();
        hasher.update(&encoded);
        hasher.digest().bytes()
    }

    /// BEP 12: prefer `announce-list` (a list of tiers, each a list of
    /// URLs) when present, falling back to a single-URL tier built from
    /// `announce`.
    fn parse_announce_list(torrent_table: &indexmap::IndexMap<String, BencodeDictValues>) -> Vec<Vec<String>> {
        if let Some(BencodeDictValues::Bencode(Bencode::List(tiers))) = torrent_table.get("announce-list") {
            let list: Vec<Vec<String>> = tiers
                .iter()
                .filter_map(|tier| match tier {
                    Bencode::List(urls) => Some(
                        urls.iter()
                            .filter_map(|u| match u {
                                Bencode::String(s) => Some(s.clone()),
                                _ => None,
                            })
                            .collect(),
                    ),
                    _ => None,
                })
                .collect();
            if !list.is_empty() {
                return list;
            }
        }

        match torrent_table.get("announce") {
            Some(BencodeDictValues::Bencode(Bencode::String(s))) => vec![vec![s.clone()]],
            _ => Vec::new(),
        }
    }

    fn parse_files(
        info_table: &indexmap::IndexMap<String, BencodeDictValues>,
        name: &str,
    ) -> Result<Vec<FileRecord>, MetainfoError> {
        if let Some(BencodeDictValues::Bencode(Bencode::Number(length))) = info_table.get("length") {
            return Ok(vec![FileRecord {
                path: PathBuf::from(name),
                length: *length as u64,
            }]);
        }

        match info_table.get("files") {
            Some(BencodeDictValues::Bencode(Bencode::List(entries))) => entries
                .iter()
                .map(|entry| Self::parse_file_entry(entry, name))
                .collect(),
            _ => Err(MetainfoError::Malformed(
                "info has neither length nor files".into(),
            )),
        }
    }

    fn parse_file_entry(entry: &Bencode, root: &str) -> Result<FileRecord, MetainfoError> {
        let Bencode::Dict(file_table) = entry else {
            return Err(MetainfoError::Malformed("files entry is not a dictionary".into()));
        };

        let length = match file_table.get("length") {
            Some(BencodeDictValues::Bencode(Bencode::Number(n))) => *n as u64,
            _ => return Err(MetainfoError::Malformed("file entry missing length".into())),
        };

        let path_list = match file_table.get("path") {
            Some(BencodeDictValues::Bencode(Bencode::List(parts))) if !parts.is_empty() => parts,
            _ => return Err(MetainfoError::Malformed("file entry missing path".into())),
        };

        let mut path = PathBuf::from(root);
        for part in path_list {
            match part {
                Bencode::String(s) => path.push(s),
                _ => return Err(MetainfoError::Malformed("file path segment is not a string".into())),
            }
        }

        Ok(FileRecord { path, length })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MetainfoError {
    #[error("malformed metainfo file: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_single_file_torrent() {
        // "pieces" is a raw 20 byte hash, not valid utf8, so the fixture is
        // built as raw bytes rather than through a string-formatting helper.
        let mut buf = Vec::new();
        buf.extend(b"d8:announce13:http://a.com/4:infod6:lengthi16384e4:name1:f12:piece lengthi16384e6:pieces20:");
        buf.extend([7u8; 20]);
        buf.extend(b"ee");

        let meta = Metainfo::from_bytes(&buf).unwrap();
        assert_eq!(meta.piece_length, 16384);
        assert_eq!(meta.total_length, 16384);
        assert_eq!(meta.files.len(), 1);
        assert_eq!(meta.files[0].path, PathBuf::from("f"));
        assert_eq!(meta.announce_list, vec![vec!["http://a.com/".to_string()]]);
    }

    #[test]
    fn multi_file_paths_are_rooted_under_name() {
        let mut buf = Vec::new();
        buf.extend(b"d4:infod5:filesld6:lengthi10ee4:pathl1:a1:beed6:lengthi5ee4:pathl1:ceee4:name3:dir12:piece lengthi16384e6:pieces20:");
        buf.extend([1u8; 20]);
        buf.extend(b"ee");

        let meta = Metainfo::from_bytes(&buf).unwrap();
        assert_eq!(meta.files.len(), 2);
        assert_eq!(meta.files[0].path, PathBuf::from("dir/a/b"));
        assert_eq!(meta.files[1].path, PathBuf::from("dir/c"));
        assert_eq!(meta.total_length, 15);
    }

    #[test]
    fn announce_list_preferred_over_announce() {
        let mut buf = Vec::new();
        buf.extend(b"d8:announce9:http://x/13:announce-listll9:http://a/ee4:infod6:lengthi1e4:name1:f12:piece lengthi1e6:pieces20:");
        buf.extend([2u8; 20]);
        buf.extend(b"ee");

        let meta = Metainfo::from_bytes(&buf).unwrap();
        assert_eq!(meta.announce_list, vec![vec!["http://a/".to_string()]]);
    }

    #[test]
    fn rejects_missing_pieces() {
        let buf = b"d4:infod6:lengthi1e4:name1:f12:piece lengthi1eee".to_vec();
        assert!(Metainfo::from_bytes(&buf).is_err());
    }
}
