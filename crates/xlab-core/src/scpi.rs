//! SCPI / IEEE 488.2 message helpers.
//!
//! Parameter rendering ([`Param`]), reply parsers, and the definite length
//! arbitrary block format used for binary transfers (waveforms, screen dumps).
//!
//! A definite length arbitrary block looks like:
//!
//! ```text
//! <header>,#<n><len><data>\n
//! ```
//!
//! where `<n>` is a single ASCII digit giving the number of digits in
//! `<len>`, and `<len>` is the decimal byte count of `<data>`.

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{Result, XlabError};

// =============================================================================
// Parameters
// =============================================================================

/// A numeric SCPI parameter or one of the standard keywords.
///
/// Floating point infinities render as the range limits: `+inf` is `MAX` and
/// `-inf` is `MIN`, so callers can ask for the limits without knowing the
/// keywords.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param {
    /// Literal value
    Value(f64),
    /// `MIN`
    Min,
    /// `MAX`
    Max,
    /// `AUTO`
    Auto,
    /// `DEF`
    Def,
    /// `INF`
    Inf,
}

impl Param {
    /// Keywords accepted when no explicit set is given.
    pub const MIN_MAX: &'static [Param] = &[Param::Min, Param::Max];

    /// Keywords accepted for measurement ranges.
    pub const RANGE: &'static [Param] = &[Param::Min, Param::Max, Param::Auto, Param::Def];

    /// Keywords accepted for measurement resolutions.
    pub const RESOLUTION: &'static [Param] = &[Param::Min, Param::Max, Param::Def];

    /// Keywords accepted for output loads.
    pub const LOAD: &'static [Param] = &[Param::Min, Param::Max, Param::Inf];

    fn keyword(&self) -> Option<&'static str> {
        match self {
            Param::Value(_) => None,
            Param::Min => Some("MIN"),
            Param::Max => Some("MAX"),
            Param::Auto => Some("AUTO"),
            Param::Def => Some("DEF"),
            Param::Inf => Some("INF"),
        }
    }

    /// Render the parameter for a SCPI command.
    ///
    /// Numeric values are multiplied by `scale` first. Keywords must be part
    /// of `allowed`.
    pub fn to_scpi(&self, scale: f64, allowed: &[Param]) -> Result<String> {
        match self {
            Param::Value(v) => {
                let v = v * scale;
                if v.is_nan() {
                    return Err(XlabError::invalid("parameter value is NaN"));
                }
                if v == f64::INFINITY {
                    Ok("MAX".to_string())
                } else if v == f64::NEG_INFINITY {
                    Ok("MIN".to_string())
                } else {
                    Ok(format!("{}", v))
                }
            }
            keyword => {
                if allowed.contains(keyword) {
                    Ok(keyword.keyword().unwrap_or_default().to_string())
                } else {
                    let names: Vec<&str> = allowed.iter().filter_map(|p| p.keyword()).collect();
                    Err(XlabError::invalid(format!(
                        "parameter should be any of {:?} or a number, not {}",
                        names, keyword
                    )))
                }
            }
        }
    }

    /// Render with scale 1 and the `MIN`/`MAX` keyword set.
    pub fn scpi(&self) -> Result<String> {
        self.to_scpi(1.0, Self::MIN_MAX)
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::Value(value)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.keyword() {
            Some(k) => write!(f, "{}", k),
            None => match self {
                Param::Value(v) => write!(f, "{}", v),
                _ => Ok(()),
            },
        }
    }
}

impl FromStr for Param {
    type Err = XlabError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MIN" | "MINIMUM" => Ok(Param::Min),
            "MAX" | "MAXIMUM" => Ok(Param::Max),
            "AUTO" => Ok(Param::Auto),
            "DEF" | "DEFAULT" => Ok(Param::Def),
            "INF" => Ok(Param::Inf),
            other => other
                .parse::<f64>()
                .map(Param::Value)
                .map_err(|_| XlabError::invalid(format!("not a number or keyword: '{}'", s))),
        }
    }
}

// =============================================================================
// Reply parsers
// =============================================================================

/// Parse a float reply.
pub fn parse_f64(reply: &str) -> Result<f64> {
    let trimmed = reply.trim();
    trimmed
        .parse::<f64>()
        .map_err(|_| XlabError::protocol(format!("expected a number, received '{}'", trimmed)))
}

/// Parse a float reply that ends in a one-character unit, e.g. `12.000V`.
pub fn parse_unit_suffixed(reply: &str) -> Result<f64> {
    let trimmed = reply.trim();
    let mut chars = trimmed.chars();
    if chars.next_back().is_none() {
        return Err(XlabError::protocol("empty reply"));
    }
    parse_f64(chars.as_str())
}

/// Parse a comma separated list of floats.
pub fn parse_float_list(reply: &str) -> Result<Vec<f64>> {
    reply.trim().split(',').map(parse_f64).collect()
}

/// Parse a quoted multi-line response.
///
/// The first line ends with a double quote (`CMD "`), the last line is a
/// lone double quote, and the lines in between are returned with their line
/// endings.
pub fn parse_quoted_response(data: &str) -> Result<String> {
    let lines: Vec<&str> = data.split_inclusive('\n').collect();
    let first = lines.first().map(|l| l.trim()).unwrap_or_default();
    let last = lines.last().map(|l| l.trim()).unwrap_or_default();

    if lines.len() < 2 || !first.ends_with('"') || last != "\"" {
        return Err(XlabError::protocol(format!(
            "invalid double-quoted data: first line = {:?}, last line = {:?}",
            first, last
        )));
    }

    Ok(lines[1..lines.len() - 1].concat())
}

/// Extract the payload of a definite length arbitrary block response.
///
/// An echoed header (`C1:WF ALL,`) ends at the last `,` before the first
/// `#` and is skipped; commas inside the payload are data. The block must be
/// terminated by exactly one `\n`.
pub fn parse_definite_length_block(data: &[u8]) -> Result<&[u8]> {
    let hash = data.iter().position(|&b| b == b'#').unwrap_or(data.len());
    let block = match data[..hash].iter().rposition(|&b| b == b',') {
        Some(idx) => &data[idx + 1..],
        None => data,
    };

    if block.first() != Some(&b'#') {
        return Err(XlabError::protocol(
            "IEEE 488.2 block data does not start with #",
        ));
    }
    if block.last() != Some(&b'\n') {
        return Err(XlabError::protocol(
            "IEEE 488.2 block data does not end with \\n",
        ));
    }

    let ndigits = block
        .get(1)
        .filter(|b| b.is_ascii_digit() && **b != b'0')
        .map(|b| (b - b'0') as usize)
        .ok_or_else(|| XlabError::protocol("IEEE 488.2 block has an invalid digit count"))?;

    let len_field = block
        .get(2..2 + ndigits)
        .ok_or_else(|| XlabError::protocol("IEEE 488.2 block header is truncated"))?;
    let nbytes: usize = std::str::from_utf8(len_field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| XlabError::protocol("IEEE 488.2 block has an invalid length field"))?;

    // '#' + digit count + payload + trailing '\n'
    if 3 + ndigits + nbytes != block.len() {
        return Err(XlabError::protocol(format!(
            "IEEE 488.2 block length mismatch: header announces {} bytes, {} received",
            nbytes,
            block.len().saturating_sub(3 + ndigits)
        )));
    }

    Ok(&block[2 + ndigits..2 + ndigits + nbytes])
}

/// Read one definite length block response from a stream, header included.
///
/// The payload is binary and may contain line feeds, so the reply is framed
/// by the announced length rather than by the terminator. The returned bytes
/// can be handed to [`parse_definite_length_block`].
pub async fn read_block_response<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut response = Vec::new();
    let n = reader.read_until(b'#', &mut response).await?;
    if n == 0 || response.last() != Some(&b'#') {
        return Err(XlabError::protocol("connection closed before block header"));
    }

    let mut digit = [0u8; 1];
    reader.read_exact(&mut digit).await?;
    response.push(digit[0]);
    if !digit[0].is_ascii_digit() || digit[0] == b'0' {
        return Err(XlabError::protocol(
            "indefinite length blocks are not supported",
        ));
    }

    let ndigits = (digit[0] - b'0') as usize;
    let mut len_field = vec![0u8; ndigits];
    reader.read_exact(&mut len_field).await?;
    response.extend_from_slice(&len_field);
    let nbytes: usize = std::str::from_utf8(&len_field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| XlabError::protocol("invalid block length field"))?;

    let start = response.len();
    response.resize(start + nbytes, 0);
    reader.read_exact(&mut response[start..]).await?;

    reader.read_until(b'\n', &mut response).await?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_infinities_render_as_limits() {
        assert_eq!(Param::Value(f64::INFINITY).scpi().unwrap(), "MAX");
        assert_eq!(Param::Value(f64::NEG_INFINITY).scpi().unwrap(), "MIN");
        assert_eq!(Param::Value(1.5).scpi().unwrap(), "1.5");
    }

    #[test]
    fn param_keywords_are_checked() {
        assert_eq!(Param::Auto.to_scpi(1.0, Param::RANGE).unwrap(), "AUTO");
        assert!(Param::Auto.to_scpi(1.0, Param::RESOLUTION).is_err());
        assert_eq!(Param::Inf.to_scpi(1.0, Param::LOAD).unwrap(), "INF");
        assert!(Param::Value(f64::NAN).scpi().is_err());
    }

    #[test]
    fn param_scale_applies_to_values_only() {
        assert_eq!(Param::Value(0.25).to_scpi(100.0, Param::MIN_MAX).unwrap(), "25");
        assert_eq!(Param::Max.to_scpi(100.0, Param::MIN_MAX).unwrap(), "MAX");
    }

    #[test]
    fn param_from_str() {
        assert_eq!("auto".parse::<Param>().unwrap(), Param::Auto);
        assert_eq!(" Max ".parse::<Param>().unwrap(), Param::Max);
        assert_eq!("2.5e-3".parse::<Param>().unwrap(), Param::Value(2.5e-3));
        assert!("volts".parse::<Param>().is_err());
    }

    #[test]
    fn unit_suffixed_reply() {
        assert_eq!(parse_unit_suffixed("12.000V\r\n").unwrap(), 12.0);
        assert_eq!(parse_unit_suffixed("0.105A").unwrap(), 0.105);
        assert!(parse_unit_suffixed("").is_err());
    }

    #[test]
    fn float_list_reply() {
        assert_eq!(
            parse_float_list("+1.0E+00,-2.5E-01\n").unwrap(),
            vec![1.0, -0.25]
        );
        assert!(parse_float_list("1.0,abc").is_err());
    }

    #[test]
    fn quoted_response() {
        let data = "TMPL \"\nline one\nline two\n\"\n";
        assert_eq!(parse_quoted_response(data).unwrap(), "line one\nline two\n");
        assert!(parse_quoted_response("TMPL\nbody\n").is_err());
    }

    #[test]
    fn definite_length_block() {
        let data = b"C1:WF ALL,#15hello\n";
        assert_eq!(parse_definite_length_block(data).unwrap(), b"hello");

        let binary = b"#14\n\n\x00\x01\n";
        assert_eq!(parse_definite_length_block(binary).unwrap(), b"\n\n\x00\x01");
    }

    #[test]
    fn commas_in_payload_are_data() {
        assert_eq!(parse_definite_length_block(b"#15a,b,c\n").unwrap(), b"a,b,c");
        assert_eq!(
            parse_definite_length_block(b"C1:WF ALL,#13x,y\n").unwrap(),
            b"x,y"
        );
    }

    #[test]
    fn definite_length_block_errors() {
        assert!(parse_definite_length_block(b"C1:WF ALL,15hello\n").is_err());
        assert!(parse_definite_length_block(b"#15hello").is_err());
        assert!(parse_definite_length_block(b"#15hello!\n").is_err());
        assert!(parse_definite_length_block(b"#x5hello\n").is_err());
    }

    #[tokio::test]
    async fn block_response_with_embedded_newlines() {
        let raw: &[u8] = b"C1:WF ALL,#16ab\ncd\n\n*IDN?";
        let mut reader = tokio::io::BufReader::new(raw);
        let response = read_block_response(&mut reader).await.unwrap();
        assert_eq!(response, b"C1:WF ALL,#16ab\ncd\n\n");
        assert_eq!(parse_definite_length_block(&response).unwrap(), b"ab\ncd\n");
    }
}
