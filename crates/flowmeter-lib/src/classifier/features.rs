//! Packet feature matrix → model input

use crate::error::{ConsoleError, ConsoleResult};

/// Flatten a per-packet feature matrix into one model sample.
///
/// For a `[packets, features]` input shape each row must carry exactly
/// `features` values; fewer rows than `packets` are zero-padded, more are
/// rejected. For any other shape the flattened matrix must match the input
/// length exactly. Every value must be finite.
pub fn flatten_payload(payload: &[Vec<f32>], input_shape: &[usize]) -> ConsoleResult<Vec<f32>> {
    if payload.is_empty() {
        return Err(ConsoleError::validation("payload is empty"));
    }

    if let Some((row, col)) = payload.iter().enumerate().find_map(|(r, row)| {
        row.iter()
            .position(|v| !v.is_finite())
            .map(|c| (r, c))
    }) {
        return Err(ConsoleError::validation(format!(
            "payload[{}][{}] is not a finite number",
            row, col
        )));
    }

    let input_len: usize = input_shape.iter().product();

    if let [packets, features] = *input_shape {
        if payload.len() > packets {
            return Err(ConsoleError::validation(format!(
                "payload has {} packets, model accepts at most {}",
                payload.len(),
                packets
            )));
        }
        if let Some((i, row)) = payload.iter().enumerate().find(|(_, r)| r.len() != features) {
            return Err(ConsoleError::validation(format!(
                "payload[{}] has {} features, model expects {}",
                i,
                row.len(),
                features
            )));
        }
        let mut input = Vec::with_capacity(input_len);
        input.extend(payload.iter().flatten().copied());
        input.resize(input_len, 0.0);
        return Ok(input);
    }

    let input: Vec<f32> = payload.iter().flatten().copied().collect();
    if input.len() != input_len {
        return Err(ConsoleError::validation(format!(
            "payload has {} values, model expects {}",
            input.len(),
            input_len
        )));
    }
    Ok(input)
}
