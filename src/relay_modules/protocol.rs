//! Decoder for the monitord socket protocol: ASCII lines of colon-separated
//! fields, the first field being a numeric command code.
use thiserror::Error;

pub const FIELD_DELIMITER: char = ':';
pub const WELCOME_CODE: &str = "100";
pub const ALERT_CODE: &str = "300";

const WELCOME_VERSION_FIELD: usize = 1;
const ALERT_KEY_FIELD: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitordMessage {
    /// Sent by monitord right after a client connects.
    Welcome { version: String },
    /// A received alert; `key` is the ZVEI/alert identifier.
    Alert { key: String, fields: Vec<String> },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Chunk is not valid ASCII: {0:?}")]
    NonAscii(Vec<u8>),
    #[error("Unknown command '{code}': {raw:?}")]
    UnknownCommand { code: String, raw: String },
    #[error("Command '{code}' is missing field {index}: {raw:?}")]
    MissingField {
        code: String,
        index: usize,
        raw: String,
    },
}

/// Parses a single protocol line (without its line terminator).
pub fn parse_message(line: &str) -> Result<MonitordMessage, ProtocolError> {
    let fields: Vec<String> = line.split(FIELD_DELIMITER).map(str::to_string).collect();
    let code = fields[0].clone();

    let required_field = |index: usize| {
        fields
            .get(index)
            .cloned()
            .ok_or_else(|| ProtocolError::MissingField {
                code: code.clone(),
                index,
                raw: line.to_string(),
            })
    };

    match code.as_str() {
        WELCOME_CODE => Ok(MonitordMessage::Welcome {
            version: required_field(WELCOME_VERSION_FIELD)?,
        }),
        ALERT_CODE => {
            let key = required_field(ALERT_KEY_FIELD)?;
            Ok(MonitordMessage::Alert { key, fields })
        }
        _ => Err(ProtocolError::UnknownCommand {
            code: code.clone(),
            raw: line.to_string(),
        }),
    }
}

/// Decodes one chunk read from the socket.
///
/// A chunk normally carries exactly one message. Line terminators are
/// stripped and a chunk holding several lines yields one result per line.
pub fn parse_chunk(chunk: &[u8]) -> Vec<Result<MonitordMessage, ProtocolError>> {
    if !chunk.is_ascii() {
        return vec![Err(ProtocolError::NonAscii(chunk.to_vec()))];
    }
    // ASCII is always valid UTF-8.
    let text = String::from_utf8_lossy(chunk);

    text.split(['\r', '\n'])
        .filter(|line| !line.is_empty())
        .map(parse_message)
        .collect()
}
