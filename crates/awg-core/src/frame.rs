//! Bulk waveform framing.
//!
//! An upload is one `MMEM:DATA` command carrying nested IEEE-488.2
//! definite-length blocks:
//!
//! ```text
//! MMEM:DATA "<name>",#<n><len>MAGIC 1000\n#<m><len2><5 * nop bytes>CLOCK <%.10e>\n
//!                    |<------------------- outer block payload ------------------->|
//! ```
//!
//! Every point is 5 bytes: a little-endian `f32` sample followed by the
//! packed marker byte (bit 0 = marker 1, bit 1 = marker 2).

use crate::buffer::SampleBuffer;
use crate::error::{AwgError, AwgResult};
use bytes::{BufMut, BytesMut};

/// Command prefix of an upload; the slot name follows in quotes.
pub const UPLOAD_COMMAND: &str = "MMEM:DATA";

/// Version tag written at the start of the outer block.
pub const MAGIC_VERSION: u32 = 1000;

/// Bytes per point on the wire.
pub const BYTES_PER_POINT: usize = 5;

/// Digits of the clock footer mantissa after the decimal point.
const CLOCK_PRECISION: usize = 10;

/// Append `payload` to `out` as a definite-length block `#<n><len><payload>`.
pub fn encode_block(payload: &[u8], out: &mut BytesMut) -> AwgResult<()> {
    let len = payload.len().to_string();
    if len.len() > 9 {
        return Err(AwgError::BlockTooLarge(payload.len()));
    }
    out.reserve(2 + len.len() + payload.len());
    out.put_u8(b'#');
    out.put_slice(len.len().to_string().as_bytes());
    out.put_slice(len.as_bytes());
    out.put_slice(payload);
    Ok(())
}

/// Split a definite-length block off the front of `input`.
///
/// Returns the block payload and whatever follows it.
pub fn decode_block(input: &[u8]) -> AwgResult<(&[u8], &[u8])> {
    let rest = input
        .strip_prefix(b"#")
        .ok_or_else(|| malformed("block does not start with '#'"))?;
    let (&digits, rest) = rest
        .split_first()
        .ok_or_else(|| malformed("block header truncated"))?;
    if !(b'1'..=b'9').contains(&digits) {
        return Err(malformed(format!(
            "invalid length-of-length byte {:?}",
            digits as char
        )));
    }
    let digits = usize::from(digits - b'0');
    if rest.len() < digits {
        return Err(malformed("block length field truncated"));
    }
    let (len_field, rest) = rest.split_at(digits);
    let len = std::str::from_utf8(len_field)
        .ok()
        .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| malformed("block length field is not decimal"))?;
    if rest.len() < len {
        return Err(malformed(format!(
            "block declares {} bytes but only {} follow",
            len,
            rest.len()
        )));
    }
    Ok(rest.split_at(len))
}

/// Render `value` the way C's `%.{precision}e` does (`1.0000000000e+09`).
pub fn format_scientific(value: f64, precision: usize) -> String {
    let rendered = format!("{:.*e}", precision, value);
    match rendered.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => rendered,
    }
}

/// One complete upload: target slot name, content and sample clock.
#[derive(Debug, Clone, PartialEq)]
pub struct WireFrame {
    /// Instrument slot the frame is written to
    pub name: String,
    /// Format tag of the inner waveform block
    pub magic: u32,
    /// Samples and markers
    pub buffer: SampleBuffer,
    /// Sample clock in Hz
    pub clock: f64,
}

impl WireFrame {
    /// Frame with the standard format tag.
    pub fn new(name: impl Into<String>, buffer: SampleBuffer, clock: f64) -> Self {
        Self {
            name: name.into(),
            magic: MAGIC_VERSION,
            buffer,
            clock,
        }
    }

    /// Interleaved sample/marker bytes, `5 * nop` long.
    pub fn payload(buffer: &SampleBuffer) -> AwgResult<BytesMut> {
        buffer.validate()?;
        let mut out = BytesMut::with_capacity(buffer.len() * BYTES_PER_POINT);
        for (i, sample) in buffer.samples().iter().enumerate() {
            out.put_f32_le(*sample);
            out.put_u8(buffer.marker_byte(i));
        }
        Ok(out)
    }

    /// Serialize into the full `MMEM:DATA` command.
    ///
    /// Fails with [`AwgError::LengthMismatch`] before producing any byte
    /// when the buffer's tracks disagree in length.
    pub fn encode(&self) -> AwgResult<Vec<u8>> {
        let points = Self::payload(&self.buffer)?;

        let mut inner = BytesMut::new();
        inner.put_slice(format!("MAGIC {}\n", self.magic).as_bytes());
        encode_block(&points, &mut inner)?;
        inner.put_slice(
            format!("CLOCK {}\n", format_scientific(self.clock, CLOCK_PRECISION)).as_bytes(),
        );

        let mut out = BytesMut::with_capacity(inner.len() + self.name.len() + 32);
        out.put_slice(format!("{} \"{}\",", UPLOAD_COMMAND, self.name).as_bytes());
        encode_block(&inner, &mut out)?;
        Ok(out.to_vec())
    }

    /// Parse a full `MMEM:DATA` command back into its parts.
    pub fn decode(bytes: &[u8]) -> AwgResult<Self> {
        let rest = bytes
            .strip_prefix(format!("{} \"", UPLOAD_COMMAND).as_bytes())
            .ok_or_else(|| malformed("missing MMEM:DATA header"))?;
        let close = rest
            .windows(2)
            .position(|w| w == b"\",")
            .ok_or_else(|| malformed("unterminated slot name"))?;
        let name = std::str::from_utf8(&rest[..close])
            .map_err(|_| malformed("slot name is not UTF-8"))?
            .to_string();

        let (outer, trailing) = decode_block(&rest[close + 2..])?;
        if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
            return Err(malformed(format!(
                "{} unexpected bytes after outer block",
                trailing.len()
            )));
        }

        let (magic, outer) = split_line(outer, "MAGIC ")?;
        let magic = magic
            .trim()
            .parse::<u32>()
            .map_err(|_| malformed(format!("invalid magic tag {:?}", magic)))?;

        let (points, footer) = decode_block(outer)?;
        if points.len() % BYTES_PER_POINT != 0 {
            return Err(malformed(format!(
                "payload of {} bytes is not a multiple of {}",
                points.len(),
                BYTES_PER_POINT
            )));
        }

        let (clock, footer) = split_line(footer, "CLOCK ")?;
        if !footer.is_empty() {
            return Err(malformed("bytes after clock footer"));
        }
        let clock = clock
            .trim()
            .parse::<f64>()
            .map_err(|_| malformed(format!("invalid clock value {:?}", clock)))?;

        let nop = points.len() / BYTES_PER_POINT;
        let mut samples = Vec::with_capacity(nop);
        let mut marker1 = Vec::with_capacity(nop);
        let mut marker2 = Vec::with_capacity(nop);
        for chunk in points.chunks_exact(BYTES_PER_POINT) {
            samples.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            marker1.push(chunk[4] & 0b01 != 0);
            marker2.push(chunk[4] & 0b10 != 0);
        }

        Ok(Self {
            name,
            magic,
            buffer: SampleBuffer::from_parts(samples, marker1, marker2),
            clock,
        })
    }
}

/// Strip `prefix`, then return the text up to the next `\n` and the bytes
/// after it.
fn split_line<'a>(input: &'a [u8], prefix: &str) -> AwgResult<(&'a str, &'a [u8])> {
    let rest = input
        .strip_prefix(prefix.as_bytes())
        .ok_or_else(|| malformed(format!("expected {:?}", prefix.trim())))?;
    let end = rest
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| malformed(format!("unterminated {:?} line", prefix.trim())))?;
    let line =
        std::str::from_utf8(&rest[..end]).map_err(|_| malformed("header line is not ASCII"))?;
    Ok((line, &rest[end + 1..]))
}

fn malformed(msg: impl Into<String>) -> AwgError {
    AwgError::MalformedFrame(msg.into())
}
