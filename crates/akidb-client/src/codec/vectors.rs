//! Packed little-endian vector encodings.

use akidb_client_core::{ClientError, ClientResult};

/// Packs a single vector as consecutive little-endian `f32` values.
pub fn pack_single(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Inverse of [`pack_single`].
pub fn unpack_single(bytes: &[u8]) -> ClientResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(ClientError::protocol(format!(
            "packed vector length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Packs a multi-vector: a little-endian `u16` inner dimension followed by
/// every row packed as in [`pack_single`].
pub fn pack_multi(rows: &[Vec<f32>]) -> ClientResult<Vec<u8>> {
    let dimension = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|row| row.len() != dimension) {
        return Err(ClientError::validation(
            "multi-vector rows must all have the same dimension",
        ));
    }
    let header = u16::try_from(dimension).map_err(|_| {
        ClientError::validation(format!(
            "multi-vector dimension {dimension} exceeds {}",
            u16::MAX
        ))
    })?;
    let mut out = Vec::with_capacity(2 + rows.len() * dimension * 4);
    out.extend_from_slice(&header.to_le_bytes());
    for row in rows {
        for value in row {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    Ok(out)
}

/// Inverse of [`pack_multi`].
pub fn unpack_multi(bytes: &[u8]) -> ClientResult<Vec<Vec<f32>>> {
    if bytes.len() < 2 {
        return Err(ClientError::protocol("multi-vector is missing its header"));
    }
    let dimension = usize::from(u16::from_le_bytes([bytes[0], bytes[1]]));
    let values = unpack_single(&bytes[2..])?;
    if dimension == 0 {
        return if values.is_empty() {
            Ok(Vec::new())
        } else {
            Err(ClientError::protocol("multi-vector has zero dimension but carries values"))
        };
    }
    if values.len() % dimension != 0 {
        return Err(ClientError::protocol(format!(
            "multi-vector of {} values does not divide into rows of {dimension}",
            values.len()
        )));
    }
    Ok(values.chunks_exact(dimension).map(<[f32]>::to_vec).collect())
}
