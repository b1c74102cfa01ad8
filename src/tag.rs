use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_derive::Serialize;

/// Name under which tag detections are emitted to listeners.
pub const TAG_DETECTED_EVENT: &str = "nfcTagDetected";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDetected {
    pub tag_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl TagDetected {
    pub fn now(id: &[u8]) -> Self {
        TagDetected {
            tag_id: format_tag_id(id),
            timestamp: now_millis(),
        }
    }
}

/// Formats raw tag id bytes as uppercase hex pairs joined by `:`, e.g. `04:3A:C2:11`.
pub fn format_tag_id(id: &[u8]) -> String {
    id.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid tag id {0:?}: expected hex byte pairs separated by ':'")]
pub struct InvalidTagId(pub String);

/// Inverse of [`format_tag_id`]; accepts either case.
pub fn parse_tag_id(s: &str) -> Result<Vec<u8>, InvalidTagId> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(':')
        .map(|pair| {
            if pair.len() != 2 {
                return Err(InvalidTagId(s.to_string()));
            }
            u8::from_str_radix(pair, 16).map_err(|_| InvalidTagId(s.to_string()))
        })
        .collect()
}

fn now_millis() -> u64 {
    // A clock set before 1970 reports 0 rather than failing the detection.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(millis)
        .unwrap_or_default()
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tag_id() {
        assert_eq!(format_tag_id(&[0x04, 0x3A, 0xC2, 0x11]), "04:3A:C2:11");
        assert_eq!(format_tag_id(&[0xff]), "FF");
        assert_eq!(format_tag_id(&[]), "");
    }

    #[test]
    fn test_format_tag_id_shape() {
        for len in 0..=16usize {
            let bytes: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(37).wrapping_add(0xa5)).collect();
            let encoded = format_tag_id(&bytes);

            assert_eq!(encoded.len(), 2 * len + len.saturating_sub(1));
            assert!(!encoded.starts_with(':'));
            assert!(!encoded.ends_with(':'));
            assert!(
                encoded
                    .chars()
                    .all(|c| c == ':' || c.is_ascii_digit() || ('A'..='F').contains(&c))
            );
            assert_eq!(encoded.split(':').filter(|p| !p.is_empty()).count(), len);
        }
    }

    #[test]
    fn test_parse_tag_id() {
        assert_eq!(parse_tag_id("04:3a:C2:11"), Ok(vec![0x04, 0x3A, 0xC2, 0x11]));
        assert_eq!(parse_tag_id(""), Ok(vec![]));
        assert!(parse_tag_id("04:3").is_err());
        assert!(parse_tag_id("04::11").is_err());
        assert!(parse_tag_id("zz").is_err());
    }

    #[test]
    fn test_event_json() {
        let event = TagDetected {
            tag_id: "04:3A:C2:11".to_string(),
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "tagId": "04:3A:C2:11", "timestamp": 1_700_000_000_000u64 })
        );
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1_700_000_000_123)), 1_700_000_000_123);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_now_has_timestamp() {
        let event = TagDetected::now(&[1, 2]);
        assert_eq!(event.tag_id, "01:02");
        assert!(event.timestamp > 0);
    }
}
