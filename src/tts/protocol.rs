//! Message framing for the read-aloud synthesis exchange.
//!
//! A synthesis turn is two text frames from the client (`speech.config`, then
//! the SSML request) answered by binary audio frames and text control frames.
//! Every binary frame starts with a 2-byte big-endian header length and a
//! header block that ends in `Path:audio\r\n`; the audio payload follows it.

use crate::defaults;
use crate::pipeline::types::Chunk;
use rand::Rng;

/// Marker preceding the audio payload inside a binary frame.
pub const AUDIO_MARKER: &[u8] = b"Path:audio\r\n";

/// Marker of the text frame that closes a turn.
pub const TURN_END_MARKER: &str = "Path:turn.end";

/// Returns the audio payload after [`AUDIO_MARKER`], or `None` if the frame
/// carries no marker.
pub fn extract_audio(frame: &[u8]) -> Option<&[u8]> {
    frame
        .windows(AUDIO_MARKER.len())
        .position(|window| window == AUDIO_MARKER)
        .map(|pos| &frame[pos + AUDIO_MARKER.len()..])
}

/// Whether a text frame signals that no more audio follows.
pub fn is_turn_end(text: &str) -> bool {
    text.contains(TURN_END_MARKER)
}

/// Timestamp in the format the endpoint expects in `X-Timestamp`.
pub fn timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// Random 32-character hex id for `X-RequestId` and `ConnectionId`.
pub fn new_request_id() -> String {
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| format!("{:02x}", rng.gen_range(0..=u8::MAX)))
        .collect()
}

/// First client frame of a turn: selects the output format.
pub fn speech_config_message(timestamp: &str) -> String {
    format!(
        "X-Timestamp:{timestamp}\r\nContent-Type:application/json; charset=utf-8\r\nPath:speech.config\r\n\r\n\
         {{\"context\":{{\"synthesis\":{{\"audio\":{{\"metadataoptions\":{{\"sentenceBoundaryEnabled\":\"false\",\"wordBoundaryEnabled\":\"false\"}},\"outputFormat\":\"{}\"}}}}}}}}",
        defaults::OUTPUT_FORMAT
    )
}

/// Second client frame of a turn: the SSML document for `chunk`.
pub fn ssml_message(request_id: &str, timestamp: &str, chunk: &Chunk) -> String {
    format!(
        "X-RequestId:{request_id}\r\nContent-Type:application/ssml+xml\r\nX-Timestamp:{timestamp}\r\nPath:ssml\r\n\r\n{}",
        ssml(chunk)
    )
}

/// SSML body with the chunk's voice and prosody.
pub fn ssml(chunk: &Chunk) -> String {
    format!(
        "<speak version=\"1.0\" xmlns=\"http://www.w3.org/2001/10/synthesis\" xml:lang=\"en-US\">\
         <voice name=\"{}\"><prosody pitch=\"{}\" rate=\"{}\" volume=\"{}\">{}</prosody></voice></speak>",
        escape_xml(&chunk.voice),
        escape_xml(&chunk.pitch),
        escape_xml(&chunk.rate),
        escape_xml(&chunk.volume),
        escape_xml(&chunk.text)
    )
}

pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Builds a binary audio frame the way the endpoint does.
pub fn encode_audio_frame(request_id: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!(
        "X-RequestId:{request_id}\r\nContent-Type:audio/mpeg\r\nPath:audio\r\n"
    );
    let header_len = header.len() as u16;
    let mut frame = Vec::with_capacity(2 + header.len() + payload.len());
    frame.extend_from_slice(&header_len.to_be_bytes());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Builds the text control frame that closes a turn.
pub fn turn_end_message(request_id: &str) -> String {
    format!(
        "X-RequestId:{request_id}\r\nContent-Type:application/json; charset=utf-8\r\nPath:turn.end\r\n\r\n{{}}"
    )
}
