//! Typed message header: a tagged-variant type standing in for a
//! dynamically typed JSON header object. The wire representation stays the
//! minimal JSON subset from [`crate::json`] for byte compatibility.

use crate::json::{self, JsonError, Value};

/// Request verb carried by the `cmd` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    List,
    Stream,
    /// Reserved; handling is left to the implementer. This implementation
    /// answers it the same way as an unknown verb (`Status::Fail`) rather
    /// than silently dropping the request.
    Block,
}

impl Cmd {
    fn as_str(self) -> &'static str {
        match self {
            Cmd::List => "LIST",
            Cmd::Stream => "STREAM",
            Cmd::Block => "BLOCK",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "LIST" => Some(Cmd::List),
            "STREAM" => Some(Cmd::Stream),
            "BLOCK" => Some(Cmd::Block),
            _ => None,
        }
    }
}

/// Response/push packet kind carried by the `p` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// `l` — full list.
    List,
    /// `lp` — partial list delta.
    ListPartial,
    /// `b` — block.
    Block,
    /// `s` — stream status.
    Status,
}

impl PacketKind {
    fn as_str(self) -> &'static str {
        match self {
            PacketKind::List => "l",
            PacketKind::ListPartial => "lp",
            PacketKind::Block => "b",
            PacketKind::Status => "s",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "l" => Some(PacketKind::List),
            "lp" => Some(PacketKind::ListPartial),
            "b" => Some(PacketKind::Block),
            "s" => Some(PacketKind::Status),
            _ => None,
        }
    }
}

/// Numeric code carried by the `st` field. `Ok` doubles as the `st:1`
/// success code on `LIST` responses and `Fail` as the `st:0` code used for
/// unknown/unparseable requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Fail = 0,
    Ok = 1,
    InProgress = 2,
    Complete = 3,
}

impl Status {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "0" => Some(Status::Fail),
            "1" => Some(Status::Ok),
            "2" => Some(Status::InProgress),
            "3" => Some(Status::Complete),
            _ => None,
        }
    }
}

/// A parsed or to-be-encoded message header. Every frame carries `s`
/// (payload length in bytes, possibly zero); the other fields are present
/// only for the message kinds that use them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub cmd: Option<Cmd>,
    pub packet: Option<PacketKind>,
    pub file: Option<String>,
    pub offset: Option<i64>,
    pub payload_len: usize,
    pub status: Option<Status>,
    pub gzip: bool,
    pub hash: Option<String>,
}

impl Header {
    #[must_use]
    pub fn list_request() -> Self {
        Self {
            cmd: Some(Cmd::List),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn stream_request(file: impl Into<String>, offset: i64) -> Self {
        Self {
            cmd: Some(Cmd::Stream),
            file: Some(file.into()),
            offset: Some(offset),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn list_response(kind: PacketKind, payload_len: usize) -> Self {
        Self {
            packet: Some(kind),
            payload_len,
            status: Some(Status::Ok),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn block(file: impl Into<String>, offset: i64, payload_len: usize, gzip: bool) -> Self {
        Self {
            packet: Some(PacketKind::Block),
            file: Some(file.into()),
            offset: Some(offset),
            payload_len,
            gzip,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn stream_status(file: impl Into<String>, status: Status) -> Self {
        Self {
            packet: Some(PacketKind::Status),
            file: Some(file.into()),
            status: Some(status),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn stream_fail() -> Self {
        Self {
            packet: Some(PacketKind::Status),
            status: Some(Status::Fail),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn unknown(payload_len: usize) -> Self {
        Self {
            status: Some(Status::Fail),
            payload_len,
            ..Default::default()
        }
    }

    /// Encodes the header as the minimal JSON object (without trailing
    /// payload bytes).
    #[must_use]
    pub fn encode(&self) -> String {
        let mut entries = Vec::new();
        if let Some(cmd) = self.cmd {
            entries.push(("cmd".to_string(), Value::Str(cmd.as_str().to_string())));
        }
        if let Some(packet) = self.packet {
            entries.push(("p".to_string(), Value::Str(packet.as_str().to_string())));
        }
        if let Some(file) = &self.file {
            entries.push(("f".to_string(), Value::Str(file.clone())));
        }
        if let Some(offset) = self.offset {
            entries.push(("o".to_string(), Value::Str(offset.to_string())));
        }
        entries.push(("s".to_string(), Value::Str(self.payload_len.to_string())));
        if let Some(status) = self.status {
            entries.push(("st".to_string(), Value::Str((status as u8).to_string())));
        }
        if self.gzip {
            entries.push(("z".to_string(), Value::Str("1".to_string())));
        }
        if let Some(hash) = &self.hash {
            entries.push(("c".to_string(), Value::Str(hash.clone())));
        }
        json::encode(&Value::Map(entries))
    }

    /// Parses a header from its minimal JSON object text.
    pub fn decode(text: &str) -> Result<Self, HeaderError> {
        let value = json::parse(text)?;
        let map = value.as_map().ok_or(HeaderError::NotAMap)?;

        let field = |key: &str| map.iter().find(|(k, _)| k == key).map(|(_, v)| v);

        let cmd = field("cmd")
            .map(|v| v.as_str().ok_or(HeaderError::NotAString("cmd")))
            .transpose()?
            .map(|s| Cmd::parse(s).ok_or(HeaderError::BadValue("cmd")))
            .transpose()?;
        let packet = field("p")
            .map(|v| v.as_str().ok_or(HeaderError::NotAString("p")))
            .transpose()?
            .map(|s| PacketKind::parse(s).ok_or(HeaderError::BadValue("p")))
            .transpose()?;
        let file = field("f")
            .map(|v| v.as_str().ok_or(HeaderError::NotAString("f")))
            .transpose()?
            .map(str::to_string);
        let offset = field("o")
            .map(|v| v.as_str().ok_or(HeaderError::NotAString("o")))
            .transpose()?
            .map(|s| s.parse::<i64>().map_err(|_| HeaderError::BadValue("o")))
            .transpose()?;
        let payload_len = field("s")
            .map(|v| v.as_str().ok_or(HeaderError::NotAString("s")))
            .transpose()?
            .map(|s| s.parse::<usize>().map_err(|_| HeaderError::BadValue("s")))
            .transpose()?
            .unwrap_or(0);
        let status = field("st")
            .map(|v| v.as_str().ok_or(HeaderError::NotAString("st")))
            .transpose()?
            .map(|s| Status::parse(s).ok_or(HeaderError::BadValue("st")))
            .transpose()?;
        let gzip = field("z").and_then(Value::as_str) == Some("1");
        let hash = field("c")
            .map(|v| v.as_str().ok_or(HeaderError::NotAString("c")))
            .transpose()?
            .map(str::to_string);

        Ok(Header {
            cmd,
            packet,
            file,
            offset,
            payload_len,
            status,
            gzip,
            hash,
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("json parse error: {0}")]
    Json(#[from] JsonError),
    #[error("header is not a JSON object")]
    NotAMap,
    #[error("field {0} is not a string")]
    NotAString(&'static str),
    #[error("field {0} has an unrecognized value")]
    BadValue(&'static str),
    #[error("header exceeded the maximum length without a closing brace")]
    TooLong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_list_request() {
        let header = Header::list_request();
        let decoded = Header::decode(&header.encode()).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn round_trips_block_header() {
        let header = Header::block("logs/a.log", 10, 256, true);
        let decoded = Header::decode(&header.encode()).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn round_trips_stream_status() {
        let header = Header::stream_status("logs/a.log", Status::Complete);
        let decoded = Header::decode(&header.encode()).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn defaults_missing_payload_length_to_zero() {
        let decoded = Header::decode(r#"{"cmd":"LIST"}"#).unwrap();
        assert_eq!(decoded.payload_len, 0);
    }

    #[test]
    fn rejects_unknown_cmd() {
        assert!(Header::decode(r#"{"cmd":"WAT","s":"0"}"#).is_err());
    }
}
