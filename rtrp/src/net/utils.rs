use super::{
    errors::{ClientError, Result},
    messages::Envelope,
};

/// Maximum accepted frame size (1MB) so a misbehaving server can't make us
/// allocate without bound.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Parse one text frame into an envelope.
pub fn decode_frame(text: &str) -> Result<Envelope> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ClientError::decode(
            "frame",
            format!(
                "frame size {} exceeds maximum allowed size of {} bytes",
                text.len(),
                MAX_FRAME_SIZE
            ),
        ));
    }
    serde_json::from_str(text).map_err(|error| ClientError::decode("frame", error))
}

/// Serialize one envelope into a text frame.
pub fn encode_frame(envelope: &Envelope) -> Result<String> {
    let text = serde_json::to_string(envelope)
        .map_err(|error| ClientError::decode(envelope.tag.as_str(), error))?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ClientError::Validation(format!(
            "serialized frame size {} exceeds maximum allowed size of {} bytes",
            text.len(),
            MAX_FRAME_SIZE
        )));
    }
    Ok(text)
}
