//! Sample-rate conversion

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Input frames per resampler chunk
const CHUNK_SIZE: usize = 1024;

/// Resample mono audio from `from_rate` to `to_rate`
///
/// The output is aligned with the input (the resampler's delay is removed)
/// and has `ceil(len * to_rate / from_rate)` samples.
///
/// # Errors
///
/// Returns error if either rate is zero or the resampler fails
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(Error::Audio(format!(
            "cannot resample between {from_rate} Hz and {to_rate} Hz"
        )));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 2, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let delay = resampler.output_delay();
    let expected = (samples.len() as u64 * u64::from(to_rate)).div_ceil(u64::from(from_rate)) as usize;
    let mut output = Vec::with_capacity(expected + delay + CHUNK_SIZE);

    let mut chunks = samples.chunks_exact(CHUNK_SIZE);
    for chunk in &mut chunks {
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let result = resampler
            .process_partial(Some(&[tail][..]), None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    // Flush what is still held back by the filter delay
    let mut flushes = 0;
    while output.len() < delay + expected && flushes < 8 {
        let result = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| Error::Audio(format!("resample flush failed: {e}")))?;
        output.extend_from_slice(&result[0]);
        flushes += 1;
    }

    let mut aligned = output.split_off(delay.min(output.len()));
    aligned.resize(expected, 0.0);

    tracing::trace!(
        from_rate,
        to_rate,
        input = samples.len(),
        output = aligned.len(),
        "resampled audio"
    );

    Ok(aligned)
}
