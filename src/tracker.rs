//! The tracker client (component H, an external collaborator per the
//! design): announces to the swarm and decodes the peer list.
//!
//! Adapted from the teacher's `tracker.rs`. Extended with BEP 12 multi-URL
//! fallback (try each tier in order, first successful tier wins) and
//! dictionary-form peer decoding in addition to the compact form. The
//! teacher's hash encoding bug — taking the already-hex-encoded info hash
//! "as is" instead of percent-encoding its raw bytes — is corrected here;
//! `reqwest`'s query serializer expects the raw bytes so it can escape them
//! itself.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use bencode::{Bencode, BencodeDictValues};

use crate::config;
use crate::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub ip: IpAddr,
    pub port: u16,
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

pub struct TrackerClient {
    client: reqwest::blocking::Client,
}

impl TrackerClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::builder()
                .timeout(config::TRACKER_TIMEOUT)
                .build()
                .expect("tracker http client configuration is valid"),
        }
    }

    /// Announces to each URL of each tier in `announce_list`, in order,
    /// returning the first tier whose announce succeeds. Per BEP 12, a
    /// tier is retried URL-by-URL before falling through to the next tier.
    pub fn announce(
        &self,
        announce_list: &[Vec<String>],
        info_hash: [u8; 20],
        peer_id: PeerId,
        port: u16,
        left: u64,
    ) -> Result<Vec<PeerAddr>, TrackerError> {
        let mut last_error = TrackerError::NoAnnounceUrls;

        for tier in announce_list {
            for url in tier {
                match self.announce_one(url, info_hash, peer_id, port, left) {
                    Ok(peers) => return Ok(peers),
                    Err(e) => {
                        log::warn!("tracker announce to {} failed: {}", url, e);
                        last_error = e;
                    }
                }
            }
        }

        Err(last_error)
    }

    fn announce_one(
        &self,
        url: &str,
        info_hash: [u8; 20],
        peer_id: PeerId,
        port: u16,
        left: u64,
    ) -> Result<Vec<PeerAddr>, TrackerError> {
        let query_params = [
            ("port", port.to_string()),
            ("uploaded", "0".to_string()),
            ("downloaded", "0".to_string()),
            ("left", left.to_string()),
            ("compact", "1".to_string()),
            ("event", "started".to_string()),
        ];

        // `info_hash`/`peer_id` are raw 20-byte strings, not UTF-8 text, so
        // they can't go through reqwest's `.query()` serializer (it would
        // percent-encode our own percent-encoding a second time). Append
        // them to the URL by hand and let `.query()` handle only the
        // alphanumeric params.
        let separator = if url.contains('?') { '&' } else { '?' };
        let url = format!(
            "{url}{separator}info_hash={}&peer_id={}",
            percent_encode_bytes(&info_hash),
            percent_encode_bytes(&peer_id)
        );

        let response = self
            .client
            .get(&url)
            .query(&query_params)
            .send()
            .map_err(|e| TrackerError::Request(e.to_string()))?
            .bytes()
            .map_err(|e| TrackerError::Request(e.to_string()))?;

        let (value, _) = Bencode::from_bytes(&response, |s| match s {
            "peers" => Some(6),
            _ => None,
        })
        .map_err(|e| TrackerError::Malformed(e.to_string()))?;

        let Bencode::Dict(table) = value else {
            return Err(TrackerError::Malformed("tracker response is not a dictionary".into()));
        };

        if let Some(BencodeDictValues::Bencode(Bencode::String(reason))) = table.get("failure reason") {
            return Err(TrackerError::Failure(reason.clone()));
        }

        match table.get("peers") {
            Some(BencodeDictValues::Bytes(chunks)) => chunks
                .iter()
                .map(|chunk| decode_compact_peer(chunk))
                .collect(),
            Some(BencodeDictValues::Bencode(Bencode::List(entries))) => entries
                .iter()
                .map(decode_dict_peer)
                .collect(),
            _ => Err(TrackerError::Malformed("tracker response missing peers".into())),
        }
    }
}

impl Default for TrackerClient {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_compact_peer(chunk: &[u8]) -> Result<PeerAddr, TrackerError> {
    if chunk.len() != 6 {
        return Err(TrackerError::Malformed("compact peer entry is not 6 bytes".into()));
    }
    let ip = IpAddr::V4(Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]));
    let port = u16::from_be_bytes([chunk[4], chunk[5]]);
    Ok(PeerAddr { ip, port })
}

fn decode_dict_peer(entry: &Bencode) -> Result<PeerAddr, TrackerError> {
    let Bencode::Dict(peer_table) = entry else {
        return Err(TrackerError::Malformed("peer entry is not a dictionary".into()));
    };

    let ip_str = match peer_table.get("ip") {
        Some(BencodeDictValues::Bencode(Bencode::String(s))) => s,
        _ => return Err(TrackerError::Malformed("peer entry missing ip".into())),
    };
    let ip: IpAddr = ip_str
        .parse()
        .map_err(|_| TrackerError::Malformed(format!("peer entry has invalid ip: {ip_str}")))?;

    let port = match peer_table.get("port") {
        Some(BencodeDictValues::Bencode(Bencode::Number(n))) => *n as u16,
        _ => return Err(TrackerError::Malformed("peer entry missing port".into())),
    };

    Ok(PeerAddr { ip, port })
}

fn percent_encode_bytes(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 3), |mut acc, b| {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => acc.push(*b as char),
            _ => acc.push_str(&format!("%{:02X}", b)),
        }
        acc
    })
}

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {
    #[error("no announce URLs available")]
    NoAnnounceUrls,
    #[error("tracker request failed: {0}")]
    Request(String),
    #[error("malformed tracker response: {0}")]
    Malformed(String),
    #[error("tracker reported failure: {0}")]
    Failure(String),
}
