//! LeCroy `WAVEDESC` template parsing and waveform decoding.
//!
//! The oscilloscope describes the layout of its binary waveform descriptor in
//! ASCII, in the reply to `TEMPLATE?`:
//!
//! ```text
//! WAVEDESC: BLOCK
//! ;
//! <  0>          DESCRIPTOR_NAME: string  ; the first 8 chars are always WAVEDESC
//! < 16>          TEMPLATE_NAME: string
//! < 32>          COMM_TYPE: enum          ; chosen by remote command COMM_FORMAT
//!                _0      byte
//!                _1      word
//!                endenum
//! ...
//! /00            ENDBLOCK
//! ```
//!
//! [`WaveTemplate`] turns that text into a field list; [`WaveTemplate::decode`]
//! applies it to the payload of a `WAVEFORM? ALL` block. The descriptor is
//! little-endian and packed. The variable length sections follow it in a
//! fixed order, with lengths taken from the same-named descriptor fields.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use bytes::Buf;
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use xlab_core::{Result, XlabError};

// =============================================================================
// Template
// =============================================================================

/// Data type of a descriptor field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// i8
    Byte,
    /// i16
    Word,
    /// i32
    Long,
    /// f32
    Float,
    /// f64
    Double,
    /// 16 bytes, NUL padded ASCII
    String,
    /// 48 bytes, NUL padded ASCII
    UnitDefinition,
    /// 16 bytes, see [`FieldValue::TimeStamp`]
    TimeStamp,
    /// Zero bytes in the descriptor
    Text,
    /// u16 with named values
    Enum(BTreeMap<u16, String>),
}

impl FieldKind {
    /// Size in the packed descriptor.
    pub fn size(&self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word | Self::Enum(_) => 2,
            Self::Long | Self::Float => 4,
            Self::Double => 8,
            Self::String | Self::TimeStamp => 16,
            Self::UnitDefinition => 48,
            Self::Text => 0,
        }
    }
}

/// One descriptor field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub position: usize,
    pub kind: FieldKind,
}

/// Parsed `WAVEDESC` block.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveTemplate {
    fields: Vec<Field>,
    size: usize,
}

static FIELD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<([\d\s]+)>\s*(\w+):\s*(\w+)").expect("Invalid template field regex")
});

static ENUM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_(\d+)\s+(\w+)").expect("Invalid template enum regex"));

static BLOCK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^WAVEDESC:\s*BLOCK").expect("Invalid template block regex"));

impl WaveTemplate {
    /// Parse the text of a `TEMPLATE?` reply (without the surrounding quotes).
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .map(|line| line.split(';').next().unwrap_or_default().trim())
            .filter(|line| !line.is_empty());

        if !lines.by_ref().any(|line| BLOCK_REGEX.is_match(line)) {
            return Err(XlabError::protocol("template has no WAVEDESC block"));
        }

        let mut fields = Vec::new();
        let mut size = 0usize;
        loop {
            let line = lines
                .next()
                .ok_or_else(|| XlabError::protocol("WAVEDESC block is not terminated"))?;
            if line.starts_with("/00") {
                break;
            }

            let caps = FIELD_REGEX.captures(line).ok_or_else(|| {
                XlabError::protocol(format!("invalid template line '{}'", line))
            })?;
            let position: usize = caps[1].trim().parse().map_err(|_| {
                XlabError::protocol(format!("invalid field position in '{}'", line))
            })?;
            let name = caps[2].to_string();

            let kind = match &caps[3] {
                "byte" => FieldKind::Byte,
                "word" => FieldKind::Word,
                "long" => FieldKind::Long,
                "float" => FieldKind::Float,
                "double" => FieldKind::Double,
                "string" => FieldKind::String,
                "unit_definition" => FieldKind::UnitDefinition,
                "time_stamp" => FieldKind::TimeStamp,
                "text" => FieldKind::Text,
                "enum" => FieldKind::Enum(Self::parse_enum(&mut lines)?),
                other => {
                    return Err(XlabError::protocol(format!(
                        "unknown field type '{}' for {}",
                        other, name
                    )))
                }
            };

            if position != size {
                return Err(XlabError::protocol(format!(
                    "field {} at position {}, expected {}",
                    name, position, size
                )));
            }
            size += kind.size();
            fields.push(Field {
                name,
                position,
                kind,
            });
        }

        Ok(Self { fields, size })
    }

    fn parse_enum<'a>(lines: &mut impl Iterator<Item = &'a str>) -> Result<BTreeMap<u16, String>> {
        let mut values = BTreeMap::new();
        loop {
            let line = lines
                .next()
                .ok_or_else(|| XlabError::protocol("enum is not terminated"))?;
            if line == "endenum" {
                return Ok(values);
            }
            let caps = ENUM_REGEX
                .captures(line)
                .ok_or_else(|| XlabError::protocol(format!("invalid enum line '{}'", line)))?;
            let value: u16 = caps[1]
                .parse()
                .map_err(|_| XlabError::protocol(format!("invalid enum value '{}'", line)))?;
            values.insert(value, caps[2].to_string());
        }
    }

    /// Size of the packed descriptor in bytes.
    pub fn descriptor_size(&self) -> usize {
        self.size
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Decode a waveform block payload.
    pub fn decode(&self, data: &[u8]) -> Result<Wave> {
        if data.len() < self.size {
            return Err(XlabError::protocol(format!(
                "waveform data is {} bytes, descriptor needs {}",
                data.len(),
                self.size
            )));
        }

        let mut buf = &data[..self.size];
        let mut descriptor = BTreeMap::new();
        for field in &self.fields {
            let value = match &field.kind {
                FieldKind::Byte => FieldValue::Int(buf.get_i8() as i64),
                FieldKind::Word => FieldValue::Int(buf.get_i16_le() as i64),
                FieldKind::Long => FieldValue::Int(buf.get_i32_le() as i64),
                FieldKind::Float => FieldValue::Float(buf.get_f32_le() as f64),
                FieldKind::Double => FieldValue::Float(buf.get_f64_le()),
                FieldKind::String => FieldValue::Text(nul_terminated(&mut buf, 16)),
                FieldKind::UnitDefinition => FieldValue::Text(nul_terminated(&mut buf, 48)),
                FieldKind::TimeStamp => FieldValue::TimeStamp(decode_timestamp(&mut buf)?),
                FieldKind::Text => FieldValue::Empty,
                FieldKind::Enum(values) => {
                    let raw = buf.get_u16_le();
                    let name = values.get(&raw).ok_or_else(|| {
                        XlabError::protocol(format!(
                            "value {} is not defined for enum {}",
                            raw, field.name
                        ))
                    })?;
                    FieldValue::Enum(name.clone())
                }
            };
            descriptor.insert(field.name.clone(), value);
        }

        let mut wave = Wave {
            descriptor,
            ..Wave::default()
        };

        if wave.length("WAVE_DESCRIPTOR")? != self.size {
            return Err(XlabError::protocol(format!(
                "WAVE_DESCRIPTOR is {} bytes, template describes {}",
                wave.length("WAVE_DESCRIPTOR")?,
                self.size
            )));
        }

        let little_endian = wave.text("COMM_ORDER")? == "LOFIRST";
        let words = wave.text("COMM_TYPE")? == "word";

        let mut offset = self.size;
        let user_text = take_section(data, &mut offset, &wave, "USER_TEXT")?;
        let res_desc1 = take_section(data, &mut offset, &wave, "RES_DESC1")?;
        let trigtime = take_section(data, &mut offset, &wave, "TRIGTIME_ARRAY")?;
        let ris_time = take_section(data, &mut offset, &wave, "RIS_TIME_ARRAY")?;
        let array_1 = take_section(data, &mut offset, &wave, "WAVE_ARRAY_1")?;
        let array_2 = take_section(data, &mut offset, &wave, "WAVE_ARRAY_2")?;

        wave.user_text = latin1(user_text);
        wave.res_desc1 = latin1(res_desc1);
        wave.trigtime_array = trigtime
            .chunks_exact(16)
            .map(|mut chunk| (chunk.get_f64_le(), chunk.get_f64_le()))
            .collect();
        wave.ris_time_array = ris_time
            .chunks_exact(8)
            .map(|mut chunk| chunk.get_f64_le())
            .collect();
        let raw_1 = samples(array_1, words, little_endian);
        let raw_2 = samples(array_2, words, little_endian);

        let gain = wave.number("VERTICAL_GAIN")?;
        let vertical_offset = wave.number("VERTICAL_OFFSET")?;
        wave.wave_array_1 = raw_1.iter().map(|r| r * gain - vertical_offset).collect();
        wave.wave_array_2 = raw_2.iter().map(|r| r * gain - vertical_offset).collect();

        let interval = wave.number("HORIZ_INTERVAL")?;
        let horiz_offset = wave.number("HORIZ_OFFSET")?;
        wave.time = (0..wave.wave_array_1.len())
            .map(|i| i as f64 * interval + horiz_offset)
            .collect();

        Ok(wave)
    }
}

impl FromStr for WaveTemplate {
    type Err = XlabError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Next variable length section; its length is the descriptor field `name`.
fn take_section<'a>(data: &'a [u8], offset: &mut usize, wave: &Wave, name: &str) -> Result<&'a [u8]> {
    let length = wave.length(name)?;
    let bytes = data
        .get(*offset..*offset + length)
        .ok_or_else(|| XlabError::protocol(format!("waveform data truncated in {}", name)))?;
    *offset += length;
    Ok(bytes)
}

fn nul_terminated(buf: &mut &[u8], len: usize) -> String {
    let raw = &buf[..len];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
    let text = String::from_utf8_lossy(&raw[..end]).into_owned();
    buf.advance(len);
    text
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn decode_timestamp(buf: &mut &[u8]) -> Result<NaiveDateTime> {
    let seconds = buf.get_f64_le();
    let minutes = buf.get_u8();
    let hours = buf.get_u8();
    let days = buf.get_u8();
    let months = buf.get_u8();
    let year = buf.get_u16_le();
    buf.advance(2);

    let whole = seconds.trunc();
    let micros = ((seconds - whole) * 1e6) as u32;
    NaiveDate::from_ymd_opt(year as i32, months as u32, days as u32)
        .and_then(|date| date.and_hms_micro_opt(hours as u32, minutes as u32, whole as u32, micros))
        .ok_or_else(|| {
            XlabError::protocol(format!(
                "invalid time stamp {}-{}-{} {}:{}:{}",
                year, months, days, hours, minutes, seconds
            ))
        })
}

fn samples(bytes: &[u8], words: bool, little_endian: bool) -> Vec<f64> {
    if words {
        bytes
            .chunks_exact(2)
            .map(|mut c| {
                let v = if little_endian {
                    c.get_i16_le()
                } else {
                    c.get_i16()
                };
                v as f64
            })
            .collect()
    } else {
        bytes.iter().map(|&b| b as i8 as f64).collect()
    }
}

// =============================================================================
// Decoded waveform
// =============================================================================

/// Value of one descriptor field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
    Enum(String),
    TimeStamp(NaiveDateTime),
    Empty,
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Enum(s) => Some(s),
            _ => None,
        }
    }
}

/// A decoded waveform: descriptor fields, the variable sections, the scaled
/// samples and their time axis.
#[derive(Debug, Clone, Default)]
pub struct Wave {
    /// Descriptor fields by template name (`VERTICAL_GAIN`, `WAVE_SOURCE`, ...)
    pub descriptor: BTreeMap<String, FieldValue>,
    pub user_text: String,
    pub res_desc1: String,
    /// (trigger time, trigger offset) per segment
    pub trigtime_array: Vec<(f64, f64)>,
    pub ris_time_array: Vec<f64>,
    /// Samples in vertical units
    pub wave_array_1: Vec<f64>,
    pub wave_array_2: Vec<f64>,
    /// Time of each `wave_array_1` sample in seconds
    pub time: Vec<f64>,
}

impl Wave {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.descriptor.get(name)
    }

    fn field(&self, name: &str) -> Result<&FieldValue> {
        self.get(name)
            .ok_or_else(|| XlabError::protocol(format!("descriptor has no field {}", name)))
    }

    /// Numeric descriptor field.
    pub fn number(&self, name: &str) -> Result<f64> {
        self.field(name)?
            .as_f64()
            .ok_or_else(|| XlabError::protocol(format!("descriptor field {} is not numeric", name)))
    }

    /// Text or enum descriptor field.
    pub fn text(&self, name: &str) -> Result<&str> {
        self.field(name)?
            .as_str()
            .ok_or_else(|| XlabError::protocol(format!("descriptor field {} is not text", name)))
    }

    fn length(&self, name: &str) -> Result<usize> {
        match self.field(name)? {
            FieldValue::Int(v) if *v >= 0 => Ok(*v as usize),
            other => Err(XlabError::protocol(format!(
                "descriptor field {} is not a length: {:?}",
                name, other
            ))),
        }
    }
}
