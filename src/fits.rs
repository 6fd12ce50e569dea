//! Image packaging: the codec seam the finalization path feeds, plus a
//! self-contained FITS encoder used as the default codec. The reader half
//! only exists so products can be verified; the control layer treats blobs
//! as opaque.

use tracing::warn;

use crate::utils::DynError;

const RECORD_LEN: usize = 80;
const BLOCK_LEN: usize = 2880;

/// Sample encoding of an image product, one variant per FITS BITPIX the
/// hardware driver historically accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitDepth {
    U8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl BitDepth {
    /// Map a bits-per-sample request to an encoding. Negative values select
    /// floating point, following FITS convention.
    pub fn from_bpp(bpp: i32) -> Result<Self, DynError> {
        match bpp {
            8 => Ok(Self::U8),
            16 => Ok(Self::I16),
            32 => Ok(Self::I32),
            64 => Ok(Self::I64),
            -32 => Ok(Self::F32),
            -64 => Ok(Self::F64),
            other => Err(format!("Unsupported bits per sample value {other}").into()),
        }
    }

    pub fn bitpix(&self) -> i32 {
        match self {
            Self::U8 => 8,
            Self::I16 => 16,
            Self::I32 => 32,
            Self::I64 => 64,
            Self::F32 => -32,
            Self::F64 => -64,
        }
    }

    fn bytes_per_sample(&self) -> usize {
        (self.bitpix().unsigned_abs() / 8) as usize
    }
}

/// Encoder for finished accumulation buffers. Implementations own nothing:
/// input samples stay with the caller, the returned blob is the caller's.
pub trait ImageCodec: Send + Sync {
    fn encode(&self, samples: &[f64], dims: &[usize], depth: BitDepth) -> Result<Vec<u8>, DynError>;
}

fn header_record(key: &str, value: &str) -> [u8; RECORD_LEN] {
    let mut record = [b' '; RECORD_LEN];
    let text = if value.is_empty() {
        key.to_string()
    } else {
        format!("{key:<8}= {value:>20}")
    };
    let bytes = text.as_bytes();
    record[..bytes.len().min(RECORD_LEN)].copy_from_slice(&bytes[..bytes.len().min(RECORD_LEN)]);
    record
}

fn pad_to_block(buf: &mut Vec<u8>, fill: u8) {
    while buf.len() % BLOCK_LEN != 0 {
        buf.push(fill);
    }
}

/// Minimal single-HDU FITS writer: one header block run, big-endian samples,
/// both padded to 2880-byte blocks.
pub struct FitsCodec;

impl ImageCodec for FitsCodec {
    fn encode(&self, samples: &[f64], dims: &[usize], depth: BitDepth) -> Result<Vec<u8>, DynError> {
        if dims.is_empty() {
            return Err("FITS image needs at least one axis".into());
        }
        let expected: usize = dims.iter().product();
        if expected != samples.len() {
            return Err(format!(
                "FITS axis product {} does not match sample count {}",
                expected,
                samples.len()
            )
            .into());
        }

        let mut blob = Vec::with_capacity(BLOCK_LEN + samples.len() * depth.bytes_per_sample());
        blob.extend_from_slice(&header_record("SIMPLE", "T"));
        blob.extend_from_slice(&header_record("BITPIX", &depth.bitpix().to_string()));
        blob.extend_from_slice(&header_record("NAXIS", &dims.len().to_string()));
        for (axis, size) in dims.iter().enumerate() {
            blob.extend_from_slice(&header_record(&format!("NAXIS{}", axis + 1), &size.to_string()));
        }
        blob.extend_from_slice(&header_record("END", ""));
        pad_to_block(&mut blob, b' ');

        for &sample in samples {
            match depth {
                BitDepth::U8 => blob.push(sample.clamp(0.0, u8::MAX as f64) as u8),
                BitDepth::I16 => blob.extend_from_slice(
                    &(sample.clamp(i16::MIN as f64, i16::MAX as f64) as i16).to_be_bytes(),
                ),
                BitDepth::I32 => blob.extend_from_slice(
                    &(sample.clamp(i32::MIN as f64, i32::MAX as f64) as i32).to_be_bytes(),
                ),
                BitDepth::I64 => blob.extend_from_slice(
                    &(sample.clamp(i64::MIN as f64, i64::MAX as f64) as i64).to_be_bytes(),
                ),
                BitDepth::F32 => blob.extend_from_slice(&(sample as f32).to_be_bytes()),
                BitDepth::F64 => blob.extend_from_slice(&sample.to_be_bytes()),
            }
        }
        pad_to_block(&mut blob, 0);
        Ok(blob)
    }
}

/// Decoded FITS image, everything widened back to f64.
#[derive(Clone, Debug)]
pub struct FitsImage {
    pub bitpix: i32,
    pub dims: Vec<usize>,
    pub samples: Vec<f64>,
}

fn record_value(record: &[u8]) -> Result<i64, DynError> {
    let text = std::str::from_utf8(&record[10..])?;
    Ok(text.trim().parse::<i64>()?)
}

/// Read back a blob produced by [`FitsCodec`].
pub fn decode_fits(blob: &[u8]) -> Result<FitsImage, DynError> {
    let mut bitpix: Option<i32> = None;
    let mut naxis: Option<usize> = None;
    let mut sizes: Vec<(usize, usize)> = Vec::new();
    let mut data_start = None;

    for (idx, record) in blob.chunks(RECORD_LEN).enumerate() {
        if record.len() < RECORD_LEN {
            return Err("Truncated FITS header record".into());
        }
        let key = std::str::from_utf8(&record[..8])?.trim_end().to_string();
        match key.as_str() {
            "SIMPLE" => {}
            "BITPIX" => bitpix = Some(record_value(record)? as i32),
            "NAXIS" => naxis = Some(record_value(record)? as usize),
            "END" => {
                // Header continues to the end of the current 2880-byte block.
                let end = (idx + 1) * RECORD_LEN;
                data_start = Some(end.div_ceil(BLOCK_LEN) * BLOCK_LEN);
                break;
            }
            other if other.starts_with("NAXIS") => {
                let axis: usize = other["NAXIS".len()..].parse()?;
                sizes.push((axis, record_value(record)? as usize));
            }
            _ => {}
        }
    }

    let bitpix = bitpix.ok_or("FITS header missing BITPIX")?;
    let naxis = naxis.ok_or("FITS header missing NAXIS")?;
    let data_start = data_start.ok_or("FITS header missing END")?;
    sizes.sort_by_key(|(axis, _)| *axis);
    if sizes.len() != naxis {
        return Err("FITS header axis count mismatch".into());
    }
    let dims: Vec<usize> = sizes.into_iter().map(|(_, size)| size).collect();
    let count: usize = dims.iter().product();

    let depth = BitDepth::from_bpp(bitpix)?;
    let step = depth.bytes_per_sample();
    let data = blob
        .get(data_start..)
        .ok_or("FITS blob ends inside the header block")?;
    if data.len() < count * step {
        return Err("FITS data area shorter than declared axes".into());
    }
    let samples = data[..count * step]
        .chunks(step)
        .map(|raw| match depth {
            BitDepth::U8 => raw[0] as f64,
            BitDepth::I16 => i16::from_be_bytes([raw[0], raw[1]]) as f64,
            BitDepth::I32 => i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
            BitDepth::I64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(raw);
                i64::from_be_bytes(b) as f64
            }
            BitDepth::F32 => f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
            BitDepth::F64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(raw);
                f64::from_be_bytes(b)
            }
        })
        .collect();

    Ok(FitsImage {
        bitpix,
        dims,
        samples,
    })
}

/// One packaged output blob.
#[derive(Clone, Debug)]
pub struct Product {
    pub label: String,
    pub data: Vec<u8>,
}

/// Encode one buffer into a product. A codec failure drops this product only
/// and is reported as a warning; the caller continues with the rest.
pub fn package(
    codec: &dyn ImageCodec,
    label: &str,
    samples: &[f64],
    dims: &[usize],
    depth: BitDepth,
) -> Option<Product> {
    match codec.encode(samples, dims, depth) {
        Ok(data) => Some(Product {
            label: label.to_string(),
            data,
        }),
        Err(err) => {
            warn!("dropping product {label}: {err}");
            None
        }
    }
}
