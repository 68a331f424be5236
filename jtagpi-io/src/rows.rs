//! Text grammar for describing a batch of legs: one row per line,
//! `# comment` to end of line, blank lines ignored.
//!
//! `chain, length, value[, tag]`, comma-separated, where `chain` is one of
//! DR, IR, IRP, IRD, DRC, DRR, DRS, RS, DL, ID (RS/DL/ID take no
//! length/value). `value` accepts `0x`/`0b` prefixes or plain decimal. A
//! trailing `id` field tags the leg with [`LegTag::ShortcutHint`].

use crate::error::{ParseError, Result};
use crate::jtag::{BitVec, Leg, LegKind, LegTag};

fn match_kind(token: &str) -> Result<LegKind> {
    let kind = match token.to_ascii_uppercase().as_str() {
        "DR" => LegKind::Dr,
        "IR" => LegKind::Ir,
        "IRP" => LegKind::Irp,
        "IRD" => LegKind::Ird,
        "DRC" => LegKind::Drc,
        "DRR" => LegKind::Drr,
        "DRS" => LegKind::Drs,
        "RS" => LegKind::Rs,
        "DL" => LegKind::Dl,
        "ID" => LegKind::Id,
        _ => return Err(ParseError::UnknownChain(token.to_string()).into()),
    };
    Ok(kind)
}

fn parse_int(token: &str) -> Result<u64> {
    let parsed = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if let Some(bin) = token.strip_prefix("0b").or_else(|| token.strip_prefix("0B")) {
        u64::from_str_radix(bin, 2)
    } else {
        token.parse::<u64>()
    };
    parsed.map_err(|_| ParseError::BadInt(token.to_string()).into())
}

fn bits_for_value(value: u64, width: u8, msb_first: bool) -> BitVec {
    let mut bits: BitVec = (0..width).map(|i| (value >> i) & 1 == 1).collect();
    if msb_first {
        bits.reverse();
    }
    bits
}

fn takes_no_operand(kind: LegKind) -> bool {
    matches!(kind, LegKind::Rs | LegKind::Dl | LegKind::Id)
}

fn is_msb_first(kind: LegKind) -> bool {
    matches!(kind, LegKind::Drc | LegKind::Drs)
}

pub struct RowParser;

impl RowParser {
    /// Parse one already comma-split row (`tokens` is the caller's
    /// already-split fields, per the field-split contract `parse_rows`
    /// implements). A bare `RS`/`DL`/`ID` needs only the chain field;
    /// everything else needs `chain, length, value`.
    pub fn parse_row(tokens: &[&str]) -> Result<Leg> {
        let Some(&kind_token) = tokens.first() else {
            return Err(ParseError::ShortRow(Vec::new()).into());
        };
        let kind = match_kind(kind_token)?;

        if takes_no_operand(kind) {
            return Ok(Leg::bare(kind));
        }

        if tokens.len() < 3 {
            return Err(ParseError::ShortRow(tokens.iter().map(|t| t.to_string()).collect()).into());
        }

        let width: u8 = tokens[1]
            .parse()
            .map_err(|_| ParseError::BadInt(tokens[1].to_string()))?;
        let value = parse_int(tokens[2])?;

        if width < 64 && value > (1u64 << width) - 1 {
            return Err(ParseError::ValueOverflow { value, width }.into());
        }

        let tag = tokens
            .get(3)
            .filter(|t| t.eq_ignore_ascii_case("id"))
            .map(|_| LegTag::ShortcutHint);

        Ok(Leg::new(kind, bits_for_value(value, width, is_msb_first(kind)), tag))
    }

    /// Parse an entire rows file/buffer. Strips `# ...` comments and blank
    /// lines. Validates every row before returning any: either the whole
    /// batch parses, or none of it is returned.
    pub fn parse_rows<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<Vec<Leg>> {
        let mut legs = Vec::new();
        for raw in lines {
            let line = match raw.split_once('#') {
                Some((before, _)) => before,
                None => raw,
            }
            .trim();

            if line.is_empty() {
                continue;
            }

            let tokens: Vec<&str> = line.split(',').map(str::trim).collect();
            legs.push(Self::parse_row(&tokens)?);
        }
        Ok(legs)
    }
}
